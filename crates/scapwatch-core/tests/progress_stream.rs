//! 分块方式不影响解析结果
use scapwatch_core::{MalformedKind, ProgressEvent, ProgressParser, ReadState, StreamEvent};
use std::collections::VecDeque;

const STREAM: &[u8] = b"xccdf_org.ssgproject.content_rule_a:pass\n\
Downloading: https://www.redhat.com/security/data/oval/com.redhat.rhsa-RHEL7.xml ...:ok\n\
xccdf_org.ssgproject.content_rule_b:fail\n\
Downloading: http://example.com/missing.xml ...:error\n\
xccdf_org.ssgproject.content_rule_c:notapplicable\n";

fn expected() -> Vec<StreamEvent> {
    let rule = |id: &str, r: &str| {
        vec![
            StreamEvent::from(ProgressEvent::RuleStarted { rule_id: id.into() }),
            StreamEvent::from(ProgressEvent::RuleResult { rule_id: id.into(), result: r.into() }),
        ]
    };
    let oval = "https://www.redhat.com/security/data/oval/com.redhat.rhsa-RHEL7.xml";
    let mut v = rule("xccdf_org.ssgproject.content_rule_a", "pass");
    v.push(ProgressEvent::DownloadStarted { file_ref: oval.into() }.into());
    v.push(ProgressEvent::DownloadFinished { file_ref: oval.into(), ok: true }.into());
    v.extend(rule("xccdf_org.ssgproject.content_rule_b", "fail"));
    v.push(ProgressEvent::DownloadStarted { file_ref: "http://example.com/missing.xml".into() }.into());
    v.push(ProgressEvent::DownloadFinished { file_ref: "http://example.com/missing.xml".into(), ok: false }.into());
    v.extend(rule("xccdf_org.ssgproject.content_rule_c", "notapplicable"));
    v
}

#[test]
fn all_at_once() {
    let mut p = ProgressParser::new(true);
    assert_eq!(p.feed(STREAM), expected());
    assert!(p.state().buffer.is_empty());
}

#[test]
fn byte_by_byte() {
    let mut p = ProgressParser::new(true);
    let events: Vec<StreamEvent> = STREAM.iter().flat_map(|b| p.feed(std::slice::from_ref(b))).collect();
    assert_eq!(events, expected());
}

#[test]
fn arbitrary_chunk_sizes() {
    for size in 1..=23 {
        let mut p = ProgressParser::new(true);
        let mut src: VecDeque<u8> = VecDeque::new();
        let mut events = Vec::new();
        for chunk in STREAM.chunks(size) {
            src.extend(chunk);
            p.pump(&mut src, &mut events);
            assert!(src.is_empty());
        }
        assert_eq!(events, expected(), "chunk size {size}");
    }
}

#[test]
fn garbage_between_lines_does_not_wedge_parser() {
    let mut input = b"\n:\nnot a progress line\n".to_vec();
    input.extend_from_slice(STREAM);
    let mut p = ProgressParser::new(true);
    let events = p.feed(&input);
    let progress: Vec<_> = events.into_iter().filter(|e| matches!(e, StreamEvent::Progress(_))).collect();
    // 第二行 ":\n" 产生一条 ID 为空的规则
    let mut want = vec![
        StreamEvent::from(ProgressEvent::RuleStarted { rule_id: String::new() }),
        StreamEvent::from(ProgressEvent::RuleResult { rule_id: String::new(), result: String::new() }),
    ];
    want.extend(expected());
    assert_eq!(progress, want);
}

fn truncated_at_eof(stream: &[u8], size: usize) -> (Vec<StreamEvent>, Option<StreamEvent>) {
    let mut p = ProgressParser::new(true);
    let mut src: VecDeque<u8> = VecDeque::new();
    let mut events = Vec::new();
    for chunk in stream.chunks(size) {
        src.extend(chunk);
        p.pump(&mut src, &mut events);
    }
    let tail = p.finish();
    assert_eq!(p.state().state, ReadState::ReadingPrefix);
    assert!(p.state().buffer.is_empty());
    (events, tail)
}

#[test]
fn stream_ending_mid_rule_result() {
    let mut stream = STREAM.to_vec();
    stream.extend_from_slice(b"rule_truncated:pa");
    for size in [1, 3, 7, stream.len()] {
        let (events, tail) = truncated_at_eof(&stream, size);
        let mut want = expected();
        want.push(ProgressEvent::RuleStarted { rule_id: "rule_truncated".into() }.into());
        assert_eq!(events, want, "chunk size {size}");
        assert_eq!(tail, Some(StreamEvent::Malformed { reason: MalformedKind::UnexpectedEof, buffer: "pa".into() }));
    }
}

#[test]
fn stream_ending_mid_download() {
    let mut stream = STREAM.to_vec();
    stream.extend_from_slice(b"Downloading: http://example.com/slow.xml ...");
    for size in [1, 5, stream.len()] {
        let (events, tail) = truncated_at_eof(&stream, size);
        let mut want = expected();
        want.push(ProgressEvent::DownloadStarted { file_ref: "http://example.com/slow.xml".into() }.into());
        assert_eq!(events, want, "chunk size {size}");
        assert!(
            matches!(tail, Some(StreamEvent::Malformed { reason: MalformedKind::UnexpectedEof, .. })),
            "chunk size {size}"
        );
    }
}

#[test]
fn stream_ending_on_newline_has_no_tail() {
    let (events, tail) = truncated_at_eof(STREAM, 4);
    assert_eq!(events, expected());
    assert_eq!(tail, None);
}
