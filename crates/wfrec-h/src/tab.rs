//! The per-tab task: owns the DOM mirror and the tab's recorder, and
//! serializes every DevTools event and coordinator command against them.

use crate::bridge::BridgeEvent;
use crate::inject;
use crate::mirror::{CdpNodeId, DomEvent, Mirror, MirrorNode};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::dom::{
    EventAttributeModified, EventAttributeRemoved, EventCharacterDataModified,
    EventChildNodeInserted, EventChildNodeRemoved, EventDocumentUpdated, EventSetChildNodes,
};
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::cdp::js_protocol::runtime::EventBindingCalled;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use wfrec_common::error::BackendError;
use wfrec_common::protocol::{Request, Response, TabCommand, TabId, TabInfo};
use wfrec_engine::recorder::Recorder;
use wfrec_engine::store::StoreChange;
use wfrec_instrument::Injection;

const DOM_BATCH_LIMIT: usize = 256;

pub(crate) enum TabControl {
    Install(oneshot::Sender<Result<(), BackendError>>),
    Command(
        TabCommand,
        oneshot::Sender<Result<Option<Response>, BackendError>>,
    ),
}

/// The page operations the tab task needs.
#[async_trait]
pub(crate) trait TabPage: Send + Sync + 'static {
    async fn load_document(&self) -> Result<MirrorNode, BackendError>;

    async fn request_child_nodes(&self, node: CdpNodeId) -> Result<(), BackendError>;

    async fn inject_scripts(&self, injection: &Injection) -> Result<(), BackendError>;

    async fn info(&self, tab: &TabId) -> Result<TabInfo, BackendError>;
}

#[async_trait]
impl TabPage for Page {
    async fn load_document(&self) -> Result<MirrorNode, BackendError> {
        inject::load_document(self).await
    }

    async fn request_child_nodes(&self, node: CdpNodeId) -> Result<(), BackendError> {
        inject::request_child_nodes(self, node).await
    }

    async fn inject_scripts(&self, injection: &Injection) -> Result<(), BackendError> {
        inject::inject_scripts(self, injection).await
    }

    async fn info(&self, tab: &TabId) -> Result<TabInfo, BackendError> {
        page_info(self, tab).await
    }
}

/// A `Runtime.bindingCalled` notification.
#[derive(Debug, Clone)]
pub(crate) struct BindingCall {
    name: String,
    payload: String,
}

pub(crate) struct TabStreams {
    dom: BoxStream<'static, Vec<DomEvent>>,
    bindings: BoxStream<'static, BindingCall>,
    loads: BoxStream<'static, ()>,
}

impl TabStreams {
    /// Subscribes to everything the tab task consumes. DOM events are merged
    /// and delivered in batches of whatever is ready, like mutation observer
    /// callbacks.
    pub(crate) async fn subscribe(page: &Page) -> Result<Self, BackendError> {
        let listen_error = |e: chromiumoxide::error::CdpError| {
            BackendError::Other(format!("Failed to subscribe to page events: {}", e))
        };

        let inserted = page
            .event_listener::<EventChildNodeInserted>()
            .await
            .map_err(listen_error)?
            .map(|e| DomEvent::ChildInserted {
                parent: *e.parent_node_id.inner(),
                previous: *e.previous_node_id.inner(),
                node: MirrorNode::from(&e.node),
            });
        let removed = page
            .event_listener::<EventChildNodeRemoved>()
            .await
            .map_err(listen_error)?
            .map(|e| DomEvent::ChildRemoved {
                parent: *e.parent_node_id.inner(),
                node: *e.node_id.inner(),
            });
        let modified = page
            .event_listener::<EventAttributeModified>()
            .await
            .map_err(listen_error)?
            .map(|e| DomEvent::AttributeModified {
                node: *e.node_id.inner(),
                name: e.name.clone(),
                value: e.value.clone(),
            });
        let attribute_removed = page
            .event_listener::<EventAttributeRemoved>()
            .await
            .map_err(listen_error)?
            .map(|e| DomEvent::AttributeRemoved {
                node: *e.node_id.inner(),
                name: e.name.clone(),
            });
        let character_data = page
            .event_listener::<EventCharacterDataModified>()
            .await
            .map_err(listen_error)?
            .map(|e| DomEvent::CharacterData {
                node: *e.node_id.inner(),
                data: e.character_data.clone(),
            });
        let set_children = page
            .event_listener::<EventSetChildNodes>()
            .await
            .map_err(listen_error)?
            .map(|e| DomEvent::SetChildNodes {
                parent: *e.parent_id.inner(),
                nodes: e.nodes.iter().map(MirrorNode::from).collect(),
            });
        let updated = page
            .event_listener::<EventDocumentUpdated>()
            .await
            .map_err(listen_error)?
            .map(|_| DomEvent::DocumentUpdated);

        let dom = stream::select_all(vec![
            inserted.boxed(),
            removed.boxed(),
            modified.boxed(),
            attribute_removed.boxed(),
            character_data.boxed(),
            set_children.boxed(),
            updated.boxed(),
        ])
        .ready_chunks(DOM_BATCH_LIMIT)
        .boxed();

        let bindings = page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(listen_error)?
            .map(|e| BindingCall {
                name: e.name.clone(),
                payload: e.payload.clone(),
            })
            .boxed();
        let loads = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(listen_error)?
            .map(|_| ())
            .boxed();

        Ok(Self {
            dom,
            bindings,
            loads,
        })
    }
}

pub(crate) struct TabTask<P> {
    page: P,
    tab: TabId,
    injection: Injection,
    mirror: Mirror,
    recorder: Option<Recorder<mpsc::UnboundedSender<Request>>>,
    requests: mpsc::UnboundedSender<Request>,
    navigations: mpsc::UnboundedSender<TabInfo>,
}

impl<P: TabPage> TabTask<P> {
    pub(crate) fn new(
        page: P,
        tab: TabId,
        injection: Injection,
        requests: mpsc::UnboundedSender<Request>,
        navigations: mpsc::UnboundedSender<TabInfo>,
    ) -> Self {
        Self {
            page,
            tab,
            injection,
            mirror: Mirror::new(),
            recorder: None,
            requests,
            navigations,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut streams: TabStreams,
        mut control: mpsc::UnboundedReceiver<TabControl>,
        mut changes: broadcast::Receiver<StoreChange>,
    ) {
        self.reload().await;
        let mut changes_open = true;

        loop {
            tokio::select! {
                biased;

                Some(batch) = streams.dom.next() => self.on_dom_batch(batch).await,
                Some(call) = streams.bindings.next() => self.on_binding(&call),
                Some(()) = streams.loads.next() => self.on_load().await,
                // Store changes go before control messages: a stop published
                // ahead of the next start's install must be seen first.
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => self.on_store_change(change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed store change notifications");
                    }
                    Err(RecvError::Closed) => changes_open = false,
                },
                message = control.recv() => match message {
                    Some(message) => self.on_control(message).await,
                    None => break,
                },
            }
        }
        debug!(tab = %self.tab, "Tab task stopped");
    }

    /// Re-reads the whole document. The old document's recorder goes with it.
    async fn reload(&mut self) {
        if self.recorder.take().is_some() {
            debug!(tab = %self.tab, "Document replaced; recorder discarded");
        }
        match self.page.load_document().await {
            Ok(root) => self.mirror.load(&root),
            Err(e) => warn!("Failed to load document: {}", e),
        }
    }

    async fn on_dom_batch(&mut self, batch: Vec<DomEvent>) {
        let mut changes = Vec::new();
        for event in batch {
            if matches!(event, DomEvent::DocumentUpdated) {
                self.reload().await;
                changes.clear();
                continue;
            }
            if let Some(change) = self.mirror.apply(event) {
                if self.mirror.in_body(&change) {
                    changes.push(change);
                }
            }
        }

        for node in self.mirror.take_incomplete() {
            if let Err(e) = self.page.request_child_nodes(node).await {
                debug!("Could not expand node {}: {}", node, e);
            }
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.on_mutations(self.mirror.document(), &changes);
        }
        self.mirror.release_detached();
    }

    fn on_binding(&mut self, call: &BindingCall) {
        if call.name != self.injection.binding {
            return;
        }
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        match BridgeEvent::parse(&call.payload) {
            Ok(event) => {
                let doc = self.mirror.document();
                recorder.handle_event(doc, event.into_page_event(doc));
            }
            Err(e) => warn!("Malformed bridge message: {}", e),
        }
    }

    async fn on_load(&mut self) {
        let info = match self.tab_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("Failed to read tab after load: {}", e);
                return;
            }
        };
        debug!(url = %info.url, "Page load complete");
        if self.navigations.send(info).is_err() {
            debug!("Navigation receiver dropped");
        }
    }

    async fn on_control(&mut self, message: TabControl) {
        match message {
            TabControl::Install(reply) => {
                let _ = reply.send(self.install().await);
            }
            TabControl::Command(command, reply) => {
                let result = match self.recorder.as_mut() {
                    Some(recorder) => Ok(recorder.handle_command(self.mirror.document(), command)),
                    None => Err(BackendError::NotInjected(self.tab.to_string())),
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn install(&mut self) -> Result<(), BackendError> {
        self.page.inject_scripts(&self.injection).await?;
        if self.recorder.is_none() {
            let url = self.tab_info().await?.url;
            let mut recorder = Recorder::new(url, self.requests.clone());
            recorder.install(self.mirror.document());
            info!(url = recorder.url(), "Recorder installed");
            self.recorder = Some(recorder);
        }
        Ok(())
    }

    fn on_store_change(&mut self, change: StoreChange) {
        match change {
            StoreChange::RecordMutations(enabled) => {
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.set_mutation_recording(enabled);
                }
            }
            StoreChange::Recording(false) => {
                if self.recorder.take().is_some() {
                    debug!(tab = %self.tab, "Recording stopped; recorder discarded");
                }
            }
            StoreChange::Recording(true) => {}
        }
    }

    async fn tab_info(&self) -> Result<TabInfo, BackendError> {
        self.page.info(&self.tab).await
    }
}

pub(crate) async fn page_info(page: &Page, tab: &TabId) -> Result<TabInfo, BackendError> {
    let url = page
        .url()
        .await
        .map_err(|_| BackendError::ConnectionLost)?
        .unwrap_or_default();
    let title = page
        .get_title()
        .await
        .unwrap_or_default()
        .unwrap_or_default();
    Ok(TabInfo {
        id: tab.clone(),
        url,
        title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as stream_mpsc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use wfrec_common::protocol::{Settings, Status, Step, StepKind};

    const ELEMENT: i64 = 1;
    const TEXT: i64 = 3;
    const DOCUMENT: i64 = 9;

    fn element(id: i64, name: &str, attrs: &[(&str, &str)], children: Vec<MirrorNode>) -> MirrorNode {
        MirrorNode {
            id,
            node_type: ELEMENT,
            name: name.into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            child_count: Some(children.len() as i64),
            children: Some(children),
            ..Default::default()
        }
    }

    fn text(id: i64, value: &str) -> MirrorNode {
        MirrorNode {
            id,
            node_type: TEXT,
            name: "#text".into(),
            value: value.into(),
            child_count: Some(0),
            children: Some(vec![]),
            ..Default::default()
        }
    }

    /// `<html><head><title>..</title></head><body><ul id=list></ul><button id=go>Go</button></body></html>`
    fn page_tree(title: &str) -> MirrorNode {
        MirrorNode {
            id: 1,
            node_type: DOCUMENT,
            name: "#document".into(),
            children: Some(vec![element(
                3,
                "html",
                &[],
                vec![
                    element(4, "head", &[], vec![element(5, "title", &[], vec![text(6, title)])]),
                    element(
                        7,
                        "body",
                        &[],
                        vec![
                            element(8, "ul", &[("id", "list")], vec![]),
                            element(9, "button", &[("id", "go")], vec![text(10, "Go")]),
                        ],
                    ),
                ],
            )]),
            ..Default::default()
        }
    }

    struct FakePage {
        document: Arc<Mutex<MirrorNode>>,
        injections: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TabPage for FakePage {
        async fn load_document(&self) -> Result<MirrorNode, BackendError> {
            Ok(self.document.lock().unwrap().clone())
        }

        async fn request_child_nodes(&self, _node: CdpNodeId) -> Result<(), BackendError> {
            Ok(())
        }

        async fn inject_scripts(&self, _injection: &Injection) -> Result<(), BackendError> {
            self.injections.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn info(&self, tab: &TabId) -> Result<TabInfo, BackendError> {
            Ok(TabInfo {
                id: tab.clone(),
                url: "https://shop.example/".into(),
                title: String::new(),
            })
        }
    }

    struct Harness {
        document: Arc<Mutex<MirrorNode>>,
        injections: Arc<AtomicUsize>,
        dom: stream_mpsc::UnboundedSender<Vec<DomEvent>>,
        bindings: stream_mpsc::UnboundedSender<BindingCall>,
        loads: stream_mpsc::UnboundedSender<()>,
        control: mpsc::UnboundedSender<TabControl>,
        changes: broadcast::Sender<StoreChange>,
        requests: mpsc::UnboundedReceiver<Request>,
        navigations: mpsc::UnboundedReceiver<TabInfo>,
    }

    impl Harness {
        fn spawn() -> Self {
            let document = Arc::new(Mutex::new(page_tree("Shop")));
            let injections = Arc::new(AtomicUsize::new(0));
            let page = FakePage {
                document: document.clone(),
                injections: injections.clone(),
            };

            let (dom, dom_rx) = stream_mpsc::unbounded();
            let (bindings, bindings_rx) = stream_mpsc::unbounded();
            let (loads, loads_rx) = stream_mpsc::unbounded();
            let streams = TabStreams {
                dom: dom_rx.boxed(),
                bindings: bindings_rx.boxed(),
                loads: loads_rx.boxed(),
            };
            let (requests_tx, requests) = mpsc::unbounded_channel();
            let (navigations_tx, navigations) = mpsc::unbounded_channel();
            let (control, control_rx) = mpsc::unbounded_channel();
            let (changes, changes_rx) = broadcast::channel(16);

            let task = TabTask::new(
                page,
                TabId::from("tab-1"),
                Injection::default(),
                requests_tx,
                navigations_tx,
            );
            tokio::spawn(task.run(streams, control_rx, changes_rx));

            Self {
                document,
                injections,
                dom,
                bindings,
                loads,
                control,
                changes,
                requests,
                navigations,
            }
        }

        async fn install(&self) -> Result<(), BackendError> {
            let (reply, rx) = oneshot::channel();
            self.control.send(TabControl::Install(reply)).unwrap();
            rx.await.unwrap()
        }

        async fn command(&self, command: TabCommand) -> Result<Option<Response>, BackendError> {
            let (reply, rx) = oneshot::channel();
            self.control
                .send(TabControl::Command(command, reply))
                .unwrap();
            rx.await.unwrap()
        }

        fn dom(&self, batch: Vec<DomEvent>) {
            self.dom.unbounded_send(batch).unwrap();
        }

        fn steps(&mut self) -> Vec<Step> {
            let mut steps = Vec::new();
            while let Ok(request) = self.requests.try_recv() {
                if let Request::LogStep { data } = request {
                    steps.push(data);
                }
            }
            steps
        }
    }

    fn step_types(steps: &[Step]) -> Vec<&'static str> {
        steps.iter().map(|s| s.step_type()).collect()
    }

    fn list_item(id: i64, label: &str) -> DomEvent {
        DomEvent::ChildInserted {
            parent: 8,
            previous: 0,
            node: element(id, "li", &[], vec![text(id + 1, label)]),
        }
    }

    #[tokio::test]
    async fn install_emits_one_page_load_per_recorder() {
        let mut harness = Harness::spawn();
        harness.install().await.unwrap();
        harness.install().await.unwrap();

        let steps = harness.steps();
        assert_eq!(
            steps.iter().map(|s| &s.kind).collect::<Vec<_>>(),
            vec![&StepKind::PageLoad {
                title: "Shop".into()
            }]
        );
        assert_eq!(steps[0].url, "https://shop.example/");
        assert_eq!(harness.injections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_then_immediate_start_installs_a_fresh_recorder() {
        let mut harness = Harness::spawn();
        harness.install().await.unwrap();
        assert_eq!(step_types(&harness.steps()), vec!["PAGE_LOAD"]);

        // Both are queued before the task runs again.
        harness.changes.send(StoreChange::Recording(false)).unwrap();
        harness.install().await.unwrap();

        let steps = harness.steps();
        assert_eq!(step_types(&steps), vec!["PAGE_LOAD"]);
        assert_eq!(steps[0].document_step, 1);

        let response = harness
            .command(TabCommand::CapturePageSource)
            .await
            .unwrap();
        assert_eq!(response.map(|r| r.status), Some(Status::Captured));
    }

    #[tokio::test]
    async fn mutation_toggle_reaches_the_live_recorder() {
        let mut harness = Harness::spawn();
        harness.install().await.unwrap();
        harness.steps();

        harness.dom(vec![list_item(20, "ignored")]);
        harness.install().await.unwrap();
        assert!(harness.steps().is_empty());

        harness.changes.send(StoreChange::RecordMutations(true)).unwrap();
        harness.install().await.unwrap();
        harness.dom(vec![list_item(22, "One")]);
        harness.install().await.unwrap();

        let steps = harness.steps();
        assert_eq!(step_types(&steps), vec!["DOM_MUTATION"]);
        match &steps[0].kind {
            StepKind::DomMutation { mutations } => {
                assert_eq!(mutations.len(), 1);
                assert_eq!(mutations[0].added_nodes, Some(vec!["<li>One</li>".to_string()]));
                assert_eq!(mutations[0].target.as_deref(), Some("#list"));
            }
            other => panic!("unexpected step: {:?}", other),
        }

        harness.changes.send(StoreChange::RecordMutations(false)).unwrap();
        harness.install().await.unwrap();
        harness.dom(vec![list_item(24, "Two")]);
        harness.install().await.unwrap();
        assert!(harness.steps().is_empty());
    }

    #[tokio::test]
    async fn mutation_batches_keep_body_changes_only() {
        let mut harness = Harness::spawn();
        harness.install().await.unwrap();
        let response = harness
            .command(TabCommand::Initialize {
                settings: Settings {
                    record_mutations_enabled: true,
                },
            })
            .await
            .unwrap();
        assert_eq!(response, None);
        harness.steps();

        harness.dom(vec![DomEvent::AttributeModified {
            node: 5,
            name: "lang".into(),
            value: "en".into(),
        }]);
        harness.dom(vec![DomEvent::ChildRemoved { parent: 8, node: 99 }]);
        harness.install().await.unwrap();
        assert!(harness.steps().is_empty());

        harness.dom(vec![
            DomEvent::AttributeModified {
                node: 5,
                name: "lang".into(),
                value: "de".into(),
            },
            list_item(30, "A"),
            DomEvent::ChildRemoved { parent: 8, node: 30 },
        ]);
        harness.install().await.unwrap();

        let steps = harness.steps();
        assert_eq!(step_types(&steps), vec!["DOM_MUTATION"]);
        let StepKind::DomMutation { mutations } = &steps[0].kind else {
            panic!("expected a mutation step");
        };
        assert_eq!(mutations.len(), 2);
        assert_eq!(mutations[1].removed_nodes, Some(vec!["<li>A</li>".to_string()]));
    }

    #[tokio::test]
    async fn document_replacement_waits_for_reinstall() {
        let mut harness = Harness::spawn();
        harness.install().await.unwrap();
        harness.steps();

        *harness.document.lock().unwrap() = page_tree("Checkout");
        harness.dom(vec![DomEvent::DocumentUpdated]);
        harness.loads.unbounded_send(()).unwrap();

        let result = harness.command(TabCommand::CapturePageSource).await;
        assert!(matches!(result, Err(BackendError::NotInjected(_))));
        let navigation = harness.navigations.try_recv().unwrap();
        assert_eq!(navigation.url, "https://shop.example/");

        harness.install().await.unwrap();
        assert_eq!(
            harness.steps().into_iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![StepKind::PageLoad {
                title: "Checkout".into()
            }]
        );
    }

    #[tokio::test]
    async fn binding_calls_become_steps() {
        let mut harness = Harness::spawn();
        harness.install().await.unwrap();
        harness.steps();

        let binding = Injection::default().binding;
        let click = r#"{"kind":"click","path":[1,1]}"#;
        for (name, payload) in [
            ("someOtherBinding", click),
            (binding.as_str(), "not json"),
            (binding.as_str(), click),
        ] {
            harness
                .bindings
                .unbounded_send(BindingCall {
                    name: name.to_string(),
                    payload: payload.to_string(),
                })
                .unwrap();
        }
        harness.install().await.unwrap();

        let steps = harness.steps();
        assert_eq!(
            steps.into_iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![StepKind::UserActionClick {
                target_element: Some("<button id=\"go\">Go</button>".into()),
                css_path: Some("#go".into()),
            }]
        );
    }
}
