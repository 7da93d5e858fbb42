#![allow(clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use figname::commands::Outcome;
use figname::commands::name::{NameConfig, name};
use figname::config::StreamConfig;
use figname::replay::{RecordedCall, ReplayApi, ReplayCase};

const URL: &str = "https://www.figma.com/design/AbC123/Shop";

fn name_config() -> NameConfig {
    NameConfig {
        url: URL.to_string(),
        token: "figd_test".to_string(),
        api_key: "sk-test".to_string(),
        provider: "openai".to_string(),
        platform: "web".to_string(),
        context: "storefront".to_string(),
        pages: Vec::new(),
        overrides: None,
        json: false,
    }
}

/// Run the `name` command against a recorded case, capturing its output.
async fn replay(case: &str) -> (String, Outcome, Vec<RecordedCall>) {
    let base = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/cases");
    let case = ReplayCase::load(&base, case).expect("Failed to load replay case");
    let api = Arc::new(ReplayApi::new(case));

    let mut output = Vec::new();
    let outcome = name(
        api.clone(),
        StreamConfig::default(),
        name_config(),
        &mut output,
    )
    .await
    .expect("Command should not error");
    let output = String::from_utf8(output).expect("Output should be valid UTF-8");
    (output, outcome, api.calls())
}

/// Strip ANSI escape codes for readable snapshots.
fn strip_ansi(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            while let Some(&next) = chars.peek() {
                chars.next();
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

macro_rules! replay_test {
    ($name:ident, $outcome:expr, $connections:expr) => {
        #[tokio::test(start_paused = true)]
        async fn $name() {
            let (output, outcome, calls) = replay(stringify!($name)).await;
            assert_eq!(outcome, $outcome);

            let opens = calls
                .iter()
                .filter(|c| matches!(c, RecordedCall::Progress(id) if id == "sess-1"))
                .count();
            assert_eq!(opens, $connections, "progress connections opened");

            let clean = strip_ansi(&output);
            insta::with_settings!({
                snapshot_path => "../tests/cases",
                prepend_module_to_snapshot => false,
            }, {
                insta::assert_snapshot!(stringify!($name), clean);
            });
        }
    };
}

replay_test!(happy_path, Outcome::Success, 1);
replay_test!(analyze_failure, Outcome::Failed, 0);
replay_test!(mid_stream_error, Outcome::Failed, 1);
replay_test!(reconnect, Outcome::Success, 2);

#[tokio::test]
async fn requests_carry_flow_inputs() {
    let (_, _, calls) = replay("happy_path").await;
    let RecordedCall::Analyze(ref analyze) = calls[0] else {
        panic!("first call should be analyze");
    };
    assert_eq!(analyze.figma_url, URL);
    assert_eq!(analyze.global_context.as_deref(), Some("storefront"));

    let RecordedCall::Name(ref request) = calls[1] else {
        panic!("second call should be naming");
    };
    assert_eq!(request.file_key.as_deref(), Some("AbC123"));
    assert_eq!(request.root_node_id.as_deref(), Some("0:1"));
    assert!(request.pages.is_none());
    assert_eq!(request.nodes.as_ref().map(Vec::len), Some(3));
    assert_eq!(request.vlm_provider, "openai");
    assert_eq!(request.global_context, "storefront");
}

#[tokio::test]
async fn analyze_failure_never_requests_naming() {
    let (_, _, calls) = replay("analyze_failure").await;
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], RecordedCall::Analyze(_)));
}
