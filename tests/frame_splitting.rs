//! Frame splitting: any chunking of a byte stream yields exactly the
//! original lines, end to end through the reader task.

mod common;

use std::time::Duration;

use devlink::link::framer::LineFramer;

#[test]
fn arbitrary_chunk_boundaries_reproduce_the_original_lines() {
    let lines = ["alpha", r#"{"type":"pong"}"#, "TEMP:23.5", "last one"];
    let stream: Vec<u8> = lines
        .iter()
        .flat_map(|l| l.bytes().chain(std::iter::once(b'\n')))
        .collect();

    // Split the stream at every possible single boundary.
    for split in 0..=stream.len() {
        let mut framer = LineFramer::new();
        let mut got = framer.push(&stream[..split]);
        got.extend(framer.push(&stream[split..]));
        assert_eq!(got, lines, "split at byte {}", split);
    }

    // And in byte-at-a-time dribbles.
    let mut framer = LineFramer::new();
    let mut got = Vec::new();
    for byte in &stream {
        got.extend(framer.push(std::slice::from_ref(byte)));
    }
    assert_eq!(got, lines);
}

#[tokio::test]
async fn reader_reassembles_lines_split_across_reads() {
    let (link, net) = common::connected_link().await;
    let mut raw = link.subscribe_raw();

    net.inject_bytes(b"VOLT:3");
    tokio::time::sleep(Duration::from_millis(30)).await;
    net.inject_bytes(b".3\nBoot ");
    tokio::time::sleep(Duration::from_millis(30)).await;
    net.inject_bytes(b"done\n");

    let first = tokio::time::timeout(Duration::from_millis(500), raw.recv())
        .await
        .expect("first frame")
        .unwrap();
    assert_eq!(first, "VOLT:3.3");
    let second = tokio::time::timeout(Duration::from_millis(500), raw.recv())
        .await
        .expect("second frame")
        .unwrap();
    assert_eq!(second, "Boot done");
    link.disconnect().await;
}
