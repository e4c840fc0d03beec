//! Unit tests for the `event:`/`data:` frame decoder.
//!
//! Covers chunk boundaries (including inside a multi-byte character),
//! payload extras, malformed and unknown frames, over-long lines, and
//! end-of-stream handling.

use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

use brambles_stream::models::event::StreamEvent;
use brambles_stream::stream::codec::{FrameCodec, MAX_LINE_BYTES};

fn word_frame(word: &str, index: u64) -> String {
    format!("event: word\ndata: {{\"word\": \"{word}\", \"index\": {index}}}\n\n")
}

/// Decode every complete frame currently buffered.
fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = codec.decode(buf).expect("decode must not fail") {
        events.push(event);
    }
    events
}

#[test]
fn decodes_single_word_frame() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(word_frame("Hi", 1).as_str());

    let events = decode_all(&mut codec, &mut buf);

    assert_eq!(
        events,
        vec![StreamEvent::Word {
            word: "Hi".into(),
            index: 1
        }]
    );
    assert!(codec.pending_event().is_none());
}

#[test]
fn decodes_batched_frames_in_order() {
    let mut codec = FrameCodec::new();
    let raw = format!(
        "event: start\ndata: {{\"chatId\": \"t1\"}}\n\n{}{}event: complete\ndata: {{\"totalWords\": 2}}\n\n",
        word_frame("Hi", 1),
        word_frame("there", 2)
    );
    let mut buf = BytesMut::from(raw.as_str());

    let events = decode_all(&mut codec, &mut buf);

    assert_eq!(
        events,
        vec![
            StreamEvent::Start {
                task_id: "t1".into()
            },
            StreamEvent::Word {
                word: "Hi".into(),
                index: 1
            },
            StreamEvent::Word {
                word: "there".into(),
                index: 2
            },
            StreamEvent::Complete { total_words: 2 },
        ]
    );
}

/// A frame split mid-line across chunks is emitted only once whole.
#[test]
fn frame_split_across_chunks_is_buffered() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    buf.extend_from_slice(b"event: wo");
    assert!(decode_all(&mut codec, &mut buf).is_empty());

    buf.extend_from_slice(b"rd\ndata: {\"word\": \"the");
    assert!(decode_all(&mut codec, &mut buf).is_empty());
    assert_eq!(codec.pending_event(), Some("word"));

    buf.extend_from_slice(b"re\", \"index\": 2}\n\n");
    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "there".into(),
            index: 2
        }]
    );
}

#[test]
fn chunk_boundary_inside_multibyte_character() {
    let frame = word_frame("café", 3);
    let bytes = frame.as_bytes();
    let split = frame.find('é').expect("accented char present") + 1;

    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&bytes[..split]);
    assert!(decode_all(&mut codec, &mut buf).is_empty());

    buf.extend_from_slice(&bytes[split..]);
    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "café".into(),
            index: 3
        }]
    );
}

#[test]
fn extra_payload_fields_are_ignored() {
    let mut codec = FrameCodec::new();
    let raw = "event: start\ndata: {\"chatId\": \"c1\", \"status\": \"streaming\", \"messageId\": \"m9\"}\n\n\
               event: complete\ndata: {\"chatId\": \"c1\", \"status\": \"completed\", \"totalWords\": 7}\n\n";
    let mut buf = BytesMut::from(raw);

    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![
            StreamEvent::Start {
                task_id: "c1".into()
            },
            StreamEvent::Complete { total_words: 7 },
        ]
    );
}

#[test]
fn malformed_payload_is_dropped_and_decoding_continues() {
    let mut codec = FrameCodec::new();
    let raw = format!(
        "event: word\ndata: {{\"word\": \"broken\", \"index\": }}\n\n{}",
        word_frame("ok", 4)
    );
    let mut buf = BytesMut::from(raw.as_str());

    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "ok".into(),
            index: 4
        }]
    );
}

#[test]
fn missing_required_field_is_dropped() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("event: word\ndata: {\"word\": \"no-index\"}\n\n");

    assert!(decode_all(&mut codec, &mut buf).is_empty());
}

#[test]
fn unknown_event_is_skipped() {
    let mut codec = FrameCodec::new();
    let raw = format!(
        "event: heartbeat\ndata: {{\"ts\": 1}}\n\n{}",
        word_frame("after", 1)
    );
    let mut buf = BytesMut::from(raw.as_str());

    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "after".into(),
            index: 1
        }]
    );
}

#[test]
fn data_line_without_event_is_ignored() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("data: {\"word\": \"orphan\", \"index\": 1}\n\n");

    assert!(decode_all(&mut codec, &mut buf).is_empty());
}

#[test]
fn empty_word_is_dropped() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(word_frame("", 1).as_str());

    assert!(decode_all(&mut codec, &mut buf).is_empty());
}

#[test]
fn crlf_line_endings_are_accepted() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("event: word\r\ndata: {\"word\": \"Hi\", \"index\": 1}\r\n\r\n");

    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "Hi".into(),
            index: 1
        }]
    );
}

#[test]
fn field_without_space_after_colon() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("event:word\ndata:{\"word\": \"tight\", \"index\": 5}\n");

    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "tight".into(),
            index: 5
        }]
    );
}

#[test]
fn over_long_line_drops_frame_but_not_stream() {
    let mut codec = FrameCodec::new();
    let huge = "x".repeat(MAX_LINE_BYTES + 16);
    let raw = format!("event: word\ndata: {huge}\n{}", word_frame("survivor", 9));
    let mut buf = BytesMut::from(raw.as_str());

    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "survivor".into(),
            index: 9
        }]
    );
}

#[test]
fn invalid_utf8_line_drops_frame_but_not_stream() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"event: word\ndata: {\"word\": \"\xff\xfe\", \"index\": 1}\n\n");
    buf.extend_from_slice(word_frame("ok", 2).as_bytes());

    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![StreamEvent::Word {
            word: "ok".into(),
            index: 2
        }]
    );
    assert!(codec.pending_event().is_none());
}

#[tokio::test]
async fn invalid_utf8_inside_framed_read_is_not_an_error() {
    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"event: word\ndata: \xff\n\n")),
        Ok(Bytes::from(word_frame("fine", 1))),
    ];
    let mut frames = FramedRead::new(StreamReader::new(stream::iter(chunks)), FrameCodec::new());

    let first = frames.next().await.expect("one frame").expect("no decode error");
    assert_eq!(
        first,
        StreamEvent::Word {
            word: "fine".into(),
            index: 1
        }
    );
    assert!(frames.next().await.is_none());
}

#[test]
fn dangling_event_line_at_eof_yields_nothing() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("event: word\n");

    assert!(decode_all(&mut codec, &mut buf).is_empty());
    assert_eq!(codec.pending_event(), Some("word"));

    let tail = codec.decode_eof(&mut buf).expect("eof decode");
    assert!(tail.is_none());
    assert!(codec.pending_event().is_none());
}

#[test]
fn partial_line_at_eof_is_discarded() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("event: word\ndata: {\"word\": \"cut\", \"ind");

    let tail = codec.decode_eof(&mut buf).expect("eof decode");

    assert!(tail.is_none());
    assert!(buf.is_empty());
}

#[tokio::test]
async fn framed_read_over_arbitrarily_chunked_body() {
    let body = format!(
        "event: start\ndata: {{\"chatId\": \"t1\"}}\n\n{}{}",
        word_frame("Hi", 1),
        word_frame("there", 2)
    );
    // Three-byte chunks split lines, fields, and payloads everywhere.
    let chunks: Vec<std::io::Result<Bytes>> = body
        .as_bytes()
        .chunks(3)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let reader = StreamReader::new(stream::iter(chunks));

    let events: Vec<StreamEvent> = FramedRead::new(reader, FrameCodec::new())
        .map(|item| item.expect("frame"))
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[2],
        StreamEvent::Word {
            word: "there".into(),
            index: 2
        }
    );
}
