//! Least-loaded backend selection.
//!
//! Every candidate is asked for its queue depth concurrently. A node that does
//! not answer counts as infinitely loaded, and since selection requires a depth
//! strictly below the "nothing found" sentinel, a pool where nobody answers
//! selects nothing rather than an arbitrary node. Ties go to whichever node
//! the iteration meets first; callers must not rely on that order.

use std::sync::Arc;

use fastcomfy_backend::{BackendClient, BackendNode};
use fastcomfy_core::{AlertKind, Alerter};
use futures::future::join_all;
use tracing::{debug, warn};

/// Pick the entry with the strictly smallest depth.
///
/// Entries at `u64::MAX` never win, so an all-failed pool yields `None`.
pub fn pick_least_loaded<T>(depths: impl IntoIterator<Item = (T, u64)>) -> Option<T> {
    let mut best = None;
    let mut min = u64::MAX;
    for (candidate, depth) in depths {
        if depth < min {
            min = depth;
            best = Some(candidate);
        }
    }
    best
}

/// Chooses the backend node for a submission.
pub struct NodeSelector {
    client: BackendClient,
    alerter: Arc<dyn Alerter>,
    warning_threshold: u64,
}

impl NodeSelector {
    /// Create a selector. Depths at or above `warning_threshold` raise a
    /// [`AlertKind::QueueDepth`] alert.
    pub fn new(client: BackendClient, alerter: Arc<dyn Alerter>, warning_threshold: u64) -> Self {
        Self {
            client,
            alerter,
            warning_threshold,
        }
    }

    /// Select the least-loaded node among `nodes`.
    ///
    /// A single candidate is returned without any network call.
    pub async fn select(&self, nodes: &[BackendNode]) -> Option<BackendNode> {
        match nodes {
            [] => None,
            [only] => Some(only.clone()),
            _ => {
                let depths = join_all(nodes.iter().map(|node| async move {
                    (node, self.depth_of(node).await)
                }))
                .await;
                let chosen = pick_least_loaded(depths).cloned();
                debug!(candidates = nodes.len(), chosen = ?chosen.as_ref().map(BackendNode::as_str), "node selected");
                chosen
            }
        }
    }

    async fn depth_of(&self, node: &BackendNode) -> u64 {
        match self.client.queue_depth(node).await {
            Ok(depth) => {
                if depth >= self.warning_threshold {
                    self.alerter.warn(
                        AlertKind::QueueDepth,
                        node.as_str(),
                        &format!(
                            "queue depth {depth} reached threshold {}",
                            self.warning_threshold
                        ),
                    );
                }
                depth
            }
            Err(e) => {
                warn!(node = %node, error = %e, "queue depth query failed");
                u64::MAX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingAlerter {
        seen: Mutex<Vec<(AlertKind, String)>>,
    }

    impl Alerter for RecordingAlerter {
        fn warn(&self, kind: AlertKind, source: &str, _message: &str) {
            self.seen.lock().push((kind, source.to_owned()));
        }
    }

    fn selector(alerter: Arc<RecordingAlerter>, threshold: u64) -> NodeSelector {
        NodeSelector::new(BackendClient::default(), alerter, threshold)
    }

    async fn backend_with_depth(depth: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prompt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"exec_info": {"queue_remaining": depth}})),
            )
            .mount(&server)
            .await;
        server
    }

    fn closed_node() -> BackendNode {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        BackendNode::parse(&format!("http://{addr}")).unwrap()
    }

    #[test]
    fn pick_prefers_strictly_smaller_depth() {
        assert_eq!(pick_least_loaded([("a", 4), ("b", 1), ("c", 3)]), Some("b"));
    }

    #[test]
    fn pick_of_nothing_is_none() {
        assert_eq!(pick_least_loaded(Vec::<(&str, u64)>::new()), None);
    }

    #[test]
    fn pick_never_chooses_failed_entries() {
        assert_eq!(pick_least_loaded([("a", u64::MAX), ("b", u64::MAX)]), None);
        assert_eq!(pick_least_loaded([("a", u64::MAX), ("b", 9)]), Some("b"));
    }

    #[tokio::test]
    async fn zero_nodes_selects_nothing() {
        let s = selector(Arc::default(), 5);
        assert!(s.select(&[]).await.is_none());
    }

    #[tokio::test]
    async fn single_node_is_chosen_without_a_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let node = BackendNode::parse(&server.uri()).unwrap();

        let s = selector(Arc::default(), 5);
        assert_eq!(s.select(std::slice::from_ref(&node)).await, Some(node));
    }

    #[tokio::test]
    async fn least_loaded_of_several_wins() {
        let busy = backend_with_depth(3).await;
        let idle = backend_with_depth(1).await;
        let nodes = [
            BackendNode::parse(&busy.uri()).unwrap(),
            BackendNode::parse(&idle.uri()).unwrap(),
        ];
        let s = selector(Arc::default(), 5);
        assert_eq!(s.select(&nodes).await, Some(nodes[1].clone()));
    }

    #[tokio::test]
    async fn unanswered_node_loses_to_any_answer() {
        let busy = backend_with_depth(40).await;
        let nodes = [closed_node(), BackendNode::parse(&busy.uri()).unwrap()];
        let s = selector(Arc::default(), 100);
        assert_eq!(s.select(&nodes).await, Some(nodes[1].clone()));
    }

    #[tokio::test]
    async fn all_failed_pool_selects_nothing() {
        let s = selector(Arc::default(), 5);
        assert!(s.select(&[closed_node(), closed_node()]).await.is_none());
    }

    #[tokio::test]
    async fn depth_at_threshold_raises_queue_alert() {
        let busy = backend_with_depth(5).await;
        let idle = backend_with_depth(0).await;
        let nodes = [
            BackendNode::parse(&busy.uri()).unwrap(),
            BackendNode::parse(&idle.uri()).unwrap(),
        ];
        let alerter = Arc::new(RecordingAlerter::default());
        let s = selector(Arc::clone(&alerter), 5);
        let _ = s.select(&nodes).await;

        let seen = alerter.seen.lock();
        assert_eq!(
            seen.as_slice(),
            &[(AlertKind::QueueDepth, nodes[0].as_str().to_owned())]
        );
    }
}
