use std::io::Write;
use std::sync::Arc;

use crate::api::Api;
use crate::commands::Outcome;
use crate::config::StreamConfig;
use crate::display::renderer::Renderer;
use crate::flow::{AnalyzeParams, FlowController};

pub struct AnalyzeConfig {
    pub url: String,
    pub token: String,
    pub context: Option<String>,
}

/// Analyze a design file and print its summary.
pub async fn analyze<W: Write>(api: Arc<dyn Api>, config: AnalyzeConfig, writer: W) -> Outcome {
    let mut renderer = Renderer::with_writer(writer);
    let mut flow = FlowController::new(api, StreamConfig::default());

    renderer.render_analyzing(&config.url);
    let params = AnalyzeParams {
        url: config.url,
        token: config.token,
        context: config.context,
        ..Default::default()
    };
    match flow.analyze(params).await {
        Ok(()) => {
            if let Some(ref analysis) = flow.state().analysis {
                renderer.render_analysis(analysis);
            }
            Outcome::Success
        }
        Err(e) => {
            renderer.render_error(&e.to_string());
            Outcome::Failed
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::replay::{RecordedCall, ReplayApi, ReplayCase, Reply};

    #[tokio::test]
    async fn prints_summary_and_forwards_context() {
        let case = ReplayCase {
            analyze: Reply {
                status: 200,
                body: r#"{"rootName":"Shop","totalNodes":2,"nodeTypes":{"TEXT":2}}"#.to_string(),
            },
            ..Default::default()
        };
        let api = Arc::new(ReplayApi::new(case));
        let mut output = Vec::new();
        let config = AnalyzeConfig {
            url: "https://www.figma.com/file/Abc/Shop".to_string(),
            token: "t".to_string(),
            context: Some("checkout".to_string()),
        };
        let outcome = analyze(api.clone(), config, &mut output).await;
        assert_eq!(outcome, Outcome::Success);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Shop"));
        assert!(text.contains("TEXT 2"));
        let Some(RecordedCall::Analyze(request)) = api.calls().into_iter().next() else {
            panic!("expected an analyze call");
        };
        assert_eq!(request.global_context.as_deref(), Some("checkout"));
    }

    #[tokio::test]
    async fn failure_is_rendered() {
        let case = ReplayCase {
            analyze: Reply {
                status: 401,
                body: r#"{"error":"invalid token"}"#.to_string(),
            },
            ..Default::default()
        };
        let mut output = Vec::new();
        let config = AnalyzeConfig {
            url: "https://www.figma.com/file/Abc".to_string(),
            token: "bad".to_string(),
            context: None,
        };
        let outcome = analyze(Arc::new(ReplayApi::new(case)), config, &mut output).await;
        assert_eq!(outcome, Outcome::Failed);
        assert!(String::from_utf8(output).unwrap().contains("invalid token"));
    }
}
