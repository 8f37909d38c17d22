use crate::mirror::{CdpNodeId, MirrorNode};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::dom::{
    self, GetDocumentParams, NodeId, RequestChildNodesParams,
};
use chromiumoxide::cdp::js_protocol::runtime::AddBindingParams;
use std::future::Future;
use std::time::Duration;
use wfrec_common::error::BackendError;
use wfrec_instrument::Injection;

/// Upper bound for one script evaluation. A page blocked in a dialog never
/// answers.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Whether an error means the page's execution context is gone or not yet
/// created, as happens mid-navigation.
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

/// Retries `operation` while it fails with a context error.
async fn retry_on_context_error<T, E, F, Fut>(
    operation_name: &str,
    mut operation: F,
) -> Result<T, BackendError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let err_str = e.to_string();
                if is_context_error(&err_str) {
                    tracing::debug!(
                        "{} context error (attempt {}/{}), retrying...",
                        operation_name,
                        attempt + 1,
                        MAX_CONTEXT_RETRIES
                    );
                    last_error = Some(err_str);
                    tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
                    continue;
                }
                return Err(BackendError::Injection(format!("{}: {}", operation_name, err_str)));
            }
        }
    }

    Err(BackendError::Injection(last_error.unwrap_or_else(|| {
        format!("{} failed after retries", operation_name)
    })))
}

async fn evaluate_with_timeout(page: &Page, script: &str) -> Result<bool, String> {
    match tokio::time::timeout(EVAL_TIMEOUT, page.evaluate(script)).await {
        Err(_) => Err("evaluation timed out".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Ok(Ok(result)) => Ok(result.into_value::<bool>().unwrap_or(false)),
    }
}

/// Registers the binding the event bridge reports through. Bindings survive
/// navigation, so this runs once per page.
pub async fn install_binding(page: &Page, injection: &Injection) -> Result<(), BackendError> {
    page.execute(AddBindingParams::new(injection.binding.clone()))
        .await
        .map_err(|e| BackendError::Injection(format!("Failed to add binding: {}", e)))?;
    Ok(())
}

/// Evaluates page instrumentation and the event bridge in the current
/// document. Both scripts guard against double installation.
pub async fn inject_scripts(page: &Page, injection: &Injection) -> Result<(), BackendError> {
    let page_script = injection.page_script();
    let bridge_script = injection.bridge_script();

    let instrumented = retry_on_context_error("Page instrumentation", || {
        evaluate_with_timeout(page, &page_script)
    })
    .await?;
    let bridged =
        retry_on_context_error("Event bridge", || evaluate_with_timeout(page, &bridge_script))
            .await?;

    tracing::debug!(instrumented, bridged, "Scripts evaluated");
    Ok(())
}

pub async fn enable_dom(page: &Page) -> Result<(), BackendError> {
    page.execute(dom::EnableParams::default())
        .await
        .map_err(|e| BackendError::Other(format!("Failed to enable DOM domain: {}", e)))?;
    Ok(())
}

/// Fetches the whole document tree.
pub async fn load_document(page: &Page) -> Result<MirrorNode, BackendError> {
    let params = GetDocumentParams {
        depth: Some(-1),
        pierce: None,
    };
    let response = page
        .execute(params)
        .await
        .map_err(|e| BackendError::Other(format!("Failed to get document: {}", e)))?;
    Ok(MirrorNode::from(&response.result.root))
}

/// Asks for a node's full subtree. It arrives later as `DOM.setChildNodes`.
pub async fn request_child_nodes(page: &Page, node: CdpNodeId) -> Result<(), BackendError> {
    let params = RequestChildNodesParams {
        node_id: NodeId::new(node),
        depth: Some(-1),
        pierce: None,
    };
    page.execute(params)
        .await
        .map_err(|e| BackendError::Other(format!("Failed to request child nodes: {}", e)))?;
    Ok(())
}
