use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::api::Api;
use crate::commands::Outcome;
use crate::config::StreamConfig;
use crate::display::renderer::Renderer;
use crate::event::FlowEvent;
use crate::flow::{AnalyzeParams, FlowController, NamingParams};
use crate::protocol::types::PageInfo;
use crate::session::state::FlowStatus;

pub struct NameConfig {
    pub url: String,
    pub token: String,
    pub api_key: String,
    pub provider: String,
    pub platform: String,
    pub context: String,
    /// Page ids or names to restrict naming to. Empty means every page.
    pub pages: Vec<String>,
    /// Pipeline overrides forwarded verbatim to both calls.
    pub overrides: Option<Value>,
    /// Print only the final results, as JSON.
    pub json: bool,
}

/// Analyze, name, follow progress, then print the preview.
pub async fn name<W: Write>(
    api: Arc<dyn Api>,
    stream: StreamConfig,
    config: NameConfig,
    writer: W,
) -> Result<Outcome> {
    let mut renderer = Renderer::with_writer(writer);
    let mut flow = FlowController::new(api, stream);
    let verbose = !config.json;

    if verbose {
        renderer.render_analyzing(&config.url);
    }
    let analyzed = flow
        .analyze(AnalyzeParams {
            url: config.url.clone(),
            token: config.token.clone(),
            vlm_api_key: Some(config.api_key.clone()),
            context: Some(config.context.clone()).filter(|c| !c.is_empty()),
            config: config.overrides.clone(),
        })
        .await;
    if let Err(e) = analyzed {
        renderer.render_error(&e.to_string());
        return Ok(Outcome::Failed);
    }
    let Some(analysis) = flow.state().analysis.clone() else {
        return Ok(Outcome::Failed);
    };
    if verbose {
        renderer.render_analysis(&analysis);
    }

    let pages = if config.pages.is_empty() {
        None
    } else {
        let selected = select_pages(analysis.pages.as_deref().unwrap_or_default(), &config.pages);
        if selected.is_empty() {
            renderer.render_error(&format!(
                "no analyzed page matches {}",
                config.pages.join(", ")
            ));
            return Ok(Outcome::Failed);
        }
        Some(selected)
    };

    let started = flow
        .start_naming(NamingParams {
            token: config.token,
            provider: config.provider,
            api_key: config.api_key,
            context: config.context,
            platform: config.platform,
            config: config.overrides,
            pages,
        })
        .await;
    if let Err(e) = started {
        renderer.render_error(&e.to_string());
        return Ok(Outcome::Failed);
    }
    if verbose && let Some(ref session_id) = flow.state().session_id {
        renderer.render_session(session_id);
    }

    let status = flow
        .run_to_settled(|state, event| match event {
            FlowEvent::StreamFailed(message) => renderer.render_error(message),
            FlowEvent::Progress | FlowEvent::Previewing if verbose => {
                renderer.render_progress(&state.progress);
            }
            FlowEvent::Progress | FlowEvent::Previewing => {}
        })
        .await;

    if status != FlowStatus::Previewing {
        if flow.state().error.is_none() {
            renderer.render_error("progress stream ended before naming completed");
        }
        return Ok(Outcome::Failed);
    }

    let dropped = flow.state().progress.dropped_messages;
    if verbose && dropped > 0 {
        renderer.render_warning(&format!("{dropped} malformed progress message(s) ignored"));
    }
    if config.json {
        let json = serde_json::to_string_pretty(&flow.state().results)
            .context("failed to serialize naming results")?;
        renderer.write_raw(&json);
    } else {
        renderer.render_results(&flow.state().results);
    }
    flow.finish()?;
    Ok(Outcome::Success)
}

/// Pages whose node id or name is listed in `wanted`, in analysis order.
fn select_pages(pages: &[PageInfo], wanted: &[String]) -> Vec<PageInfo> {
    pages
        .iter()
        .filter(|page| wanted.iter().any(|w| *w == page.node_id || *w == page.name))
        .cloned()
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::replay::{RecordedCall, ReplayApi, ReplayCase, Reply};

    fn config(pages: &[&str], json: bool) -> NameConfig {
        NameConfig {
            url: "https://www.figma.com/design/Key1/App".to_string(),
            token: "t".to_string(),
            api_key: "k".to_string(),
            provider: "openai".to_string(),
            platform: "web".to_string(),
            context: String::new(),
            pages: pages.iter().map(ToString::to_string).collect(),
            overrides: None,
            json,
        }
    }

    fn case() -> ReplayCase {
        ReplayCase {
            analyze: Reply {
                status: 200,
                body: r#"{"totalNodes":2,"pages":[{"nodeId":"0:1","name":"Home"},{"nodeId":"0:2","name":"Cart"}]}"#
                    .to_string(),
            },
            name: Reply {
                status: 200,
                body: r#"{"sessionId":"s9"}"#.to_string(),
            },
            connections: vec![
                "data: {\"type\":\"all_complete\",\"results\":[{\"nodeId\":\"1:1\",\"markId\":1,\"suggestedName\":\"cart-total\",\"confidence\":0.9}]}\n\n"
                    .to_string(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn select_pages_matches_id_or_name() {
        let pages: Vec<PageInfo> = serde_json::from_str(
            r#"[{"nodeId":"0:1","name":"Home"},{"nodeId":"0:2","name":"Cart"},{"nodeId":"0:3","name":"Icons"}]"#,
        )
        .unwrap();
        let wanted = vec!["Icons".to_string(), "0:1".to_string()];
        let names: Vec<_> = select_pages(&pages, &wanted)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["Home", "Icons"]);
    }

    #[tokio::test]
    async fn json_output_is_only_the_results() {
        let mut output = Vec::new();
        let outcome = name(
            Arc::new(ReplayApi::new(case())),
            StreamConfig::default(),
            config(&[], true),
            &mut output,
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Success);
        let results: Vec<crate::protocol::types::NamingResult> =
            serde_json::from_slice(&output).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].suggested_name, "cart-total");
    }

    #[tokio::test]
    async fn page_filter_narrows_request() {
        let api = Arc::new(ReplayApi::new(case()));
        let mut output = Vec::new();
        let outcome = name(
            api.clone(),
            StreamConfig::default(),
            config(&["Cart"], false),
            &mut output,
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Success);
        let request = api
            .calls()
            .into_iter()
            .find_map(|c| match c {
                RecordedCall::Name(r) => Some(r),
                _ => None,
            })
            .unwrap();
        let ids: Vec<_> = request.pages.unwrap().into_iter().map(|p| p.node_id).collect();
        assert_eq!(ids, ["0:2"]);
    }

    #[tokio::test]
    async fn unknown_page_fails_before_naming() {
        let api = Arc::new(ReplayApi::new(case()));
        let mut output = Vec::new();
        let outcome = name(
            api.clone(),
            StreamConfig::default(),
            config(&["Settings"], false),
            &mut output,
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Failed);
        assert!(String::from_utf8(output).unwrap().contains("no analyzed page matches Settings"));
        assert!(
            !api.calls()
                .iter()
                .any(|c| matches!(c, RecordedCall::Name(_)))
        );
    }
}
