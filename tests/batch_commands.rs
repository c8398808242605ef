//! Batch executor: one aggregate round trip, positional demultiplexing.

mod common;

use devlink::{BatchCommand, LinkError};
use serde_json::json;

#[tokio::test]
async fn outcomes_map_to_inputs_positionally() {
    let (link, net) = common::connected_link().await;
    let commands = vec![
        BatchCommand::with_params("adc_read", json!({"pin": 32})),
        BatchCommand::new("bogus_op"),
        BatchCommand::new("ping"),
    ];
    let outcomes = link.batch_commands(&commands).await.expect("batch");
    assert_eq!(outcomes.len(), 3);

    let first = outcomes[0].as_ref().expect("adc ok");
    assert_eq!(first["pin"], 32);
    let second = outcomes[1].as_ref().expect_err("bogus fails");
    assert!(second.contains("Unknown command"));
    assert!(outcomes[2].is_ok());

    // One aggregate request, not three.
    assert_eq!(net.written_count("\"command\":\"batch\""), 1);
    link.disconnect().await;
}

#[tokio::test]
async fn empty_batch_is_rejected_without_touching_the_wire() {
    let (link, net) = common::connected_link().await;
    let err = link.batch_commands(&[]).await.expect_err("empty");
    assert!(matches!(err, LinkError::Protocol(_)));
    assert_eq!(net.written_lines().len(), 0);
    link.disconnect().await;
}

#[tokio::test]
async fn adc_convenience_wrapper_preserves_pin_order() {
    let (link, _net) = common::connected_link().await;
    let readings = link.read_adc_channels(&[39, 34, 36]).await.expect("batch read");
    assert_eq!(readings.len(), 3);
    let pins: Vec<u8> = readings
        .iter()
        .map(|r| r.as_ref().expect("reading").pin)
        .collect();
    assert_eq!(pins, vec![39, 34, 36]);
    assert_eq!(readings[0].as_ref().unwrap().raw_value, 3900);
    link.disconnect().await;
}

#[tokio::test]
async fn missing_indices_surface_as_errors_not_shifts() {
    let (link, net) = common::connected_link_with(common::test_options()).await;
    // Device only reports index 1, leaving 0 and 2 unanswered.
    net.set_handler(|line: &str| {
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap_or_default();
        if parsed["command"] == "batch" {
            vec![
                r#"{"type":"batch_result","total":3,"success_count":1,"error_count":0,"results":[{"index":1,"result":{"type":"pong"}}],"errors":[]}"#
                    .to_string(),
            ]
        } else {
            vec![]
        }
    });
    let commands = vec![
        BatchCommand::new("ping"),
        BatchCommand::new("ping"),
        BatchCommand::new("ping"),
    ];
    let outcomes = link.batch_commands(&commands).await.expect("batch");
    assert!(outcomes[0].is_err());
    assert!(outcomes[1].is_ok());
    assert!(outcomes[2].is_err());
    link.disconnect().await;
}
