//! Autonomous registry: the listener catalog and its derived artifacts.
//!
//! Registration is transactional: the spec is validated against the current
//! snapshot in full, all derived artifacts (root tag, XSD, example, prompt
//! fragment) are materialized, and only then is the new snapshot swapped in.
//! Readers never lock across a dispatch; the pump takes an `Arc` snapshot
//! per message, so unregistration cannot shear a dispatch in progress.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::RwLock;

use polyp_core::descriptor::PayloadDescriptor;
use polyp_core::error::RegisterError;
use polyp_core::handler::Handler;
use polyp_xml::c14n::to_canonical_string;
use polyp_xml::schema::{synthesize_example, synthesize_xsd};

/// Fixed warning appended to every usage-instructions block.
pub const RESPONSE_SEMANTICS_WARNING: &str =
    "Responding with a payload ends the current sub-chain and returns control to the caller.";

/// Registration request for one capability.
pub struct ListenerSpec {
    pub name: String,
    pub description: String,
    pub payload_type: PayloadDescriptor,
    pub handler: Arc<dyn Handler>,
    pub is_agent: bool,
    pub peers: Vec<String>,
    pub broadcast: bool,
    /// Per-listener handler timeout; the organism default applies when unset.
    pub timeout_secs: Option<u64>,
}

impl ListenerSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        payload_type: PayloadDescriptor,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            payload_type,
            handler,
            is_agent: false,
            peers: Vec::new(),
            broadcast: false,
            timeout_secs: None,
        }
    }

    pub fn as_agent(mut self) -> Self {
        self.is_agent = true;
        self
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// A registered capability with its cached artifacts.
pub struct Listener {
    pub name: String,
    pub description: String,
    pub payload_type: Arc<PayloadDescriptor>,
    pub handler: Arc<dyn Handler>,
    pub is_agent: bool,
    pub peers: Vec<String>,
    pub broadcast: bool,
    pub root_tag: String,
    pub schema_xsd: String,
    pub example_xml: String,
    pub prompt_fragment: String,
    pub timeout_secs: Option<u64>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("root_tag", &self.root_tag)
            .field("is_agent", &self.is_agent)
            .field("broadcast", &self.broadcast)
            .field("peers", &self.peers)
            .finish()
    }
}

/// Derive the routing root tag for a listener.
///
/// Non-broadcast listeners derive from their full name. Broadcast listeners
/// derive from the name's group prefix (everything before the final dot), so
/// `search.google` and `search.bing` carrying the same payload structure
/// share `search.<type>` and fan out together.
pub fn derive_root_tag(
    name: &str,
    type_name: &str,
    broadcast: bool,
) -> Result<String, RegisterError> {
    let base = if broadcast {
        match name.rsplit_once('.') {
            Some((group, _)) => group,
            None => {
                return Err(RegisterError::BroadcastWithoutGroup {
                    name: name.to_string(),
                })
            }
        }
    } else {
        name
    };
    Ok(format!(
        "{}.{}",
        base.to_lowercase(),
        type_name.to_lowercase()
    ))
}

/// Immutable view of the catalog, shared per dispatch.
#[derive(Default)]
pub struct RegistrySnapshot {
    by_name: IndexMap<String, Arc<Listener>>,
    by_root: HashMap<String, Vec<Arc<Listener>>>,
}

impl RegistrySnapshot {
    pub fn lookup_by_name(&self, name: &str) -> Option<&Arc<Listener>> {
        self.by_name.get(name)
    }

    /// Zero, one, or (for broadcast) several listeners for a root tag.
    pub fn lookup_by_root(&self, root_tag: &str) -> &[Arc<Listener>] {
        self.by_root
            .get(root_tag)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// `(name, description)` pairs in registration order.
    pub fn capability_entries(&self) -> Vec<(String, String)> {
        self.by_name
            .values()
            .map(|l| (l.name.clone(), l.description.clone()))
            .collect()
    }

    /// Concatenated prompt fragments for a listener's declared peers, in
    /// declaration order, closed with the response-semantics warning.
    pub fn usage_instructions_for(&self, listener: &Listener) -> String {
        if listener.peers.is_empty() {
            return String::new();
        }
        let mut parts: Vec<String> = Vec::new();
        for peer in &listener.peers {
            if let Some(peer_listener) = self.by_name.get(peer) {
                parts.push(peer_listener.prompt_fragment.clone());
            }
        }
        parts.push(RESPONSE_SEMANTICS_WARNING.to_string());
        parts.join("\n\n")
    }
}

/// The catalog. Write-rare, read-heavy: writes rebuild a snapshot under the
/// lock, reads clone the `Arc`.
pub struct Registry {
    state: RwLock<Arc<RegistrySnapshot>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.state.read().await.clone()
    }

    /// Register a listener, materializing all derived artifacts.
    ///
    /// Refused when the description is missing, the root tag collides with a
    /// non-broadcast entry, an agent's root tag is already taken, broadcast
    /// structures diverge, or a peer is unknown. No partial state on error.
    pub async fn register(&self, spec: ListenerSpec) -> Result<Arc<Listener>, RegisterError> {
        let mut state = self.state.write().await;
        let current = state.as_ref();

        if spec.name.trim().is_empty() {
            return Err(RegisterError::EmptyName);
        }
        if spec.description.trim().is_empty() {
            return Err(RegisterError::MissingDescription { name: spec.name });
        }
        if current.by_name.contains_key(&spec.name) {
            return Err(RegisterError::DuplicateName { name: spec.name });
        }
        if spec.is_agent && spec.broadcast {
            return Err(RegisterError::AgentBroadcast { name: spec.name });
        }

        let root_tag = derive_root_tag(&spec.name, &spec.payload_type.type_name, spec.broadcast)?;

        if let Some(existing) = current.by_root.get(&root_tag) {
            if spec.is_agent || !spec.broadcast {
                return Err(RegisterError::RootTagCollision { root_tag });
            }
            for other in existing {
                if !other.broadcast {
                    return Err(RegisterError::RootTagCollision { root_tag });
                }
                if !other.payload_type.same_structure(&spec.payload_type) {
                    return Err(RegisterError::BroadcastShapeMismatch { root_tag });
                }
            }
        }

        for peer in &spec.peers {
            if peer != &spec.name && !current.by_name.contains_key(peer) {
                return Err(RegisterError::UnknownPeer {
                    listener: spec.name,
                    peer: peer.clone(),
                });
            }
        }

        let schema_xsd = synthesize_xsd(&root_tag, &spec.payload_type);
        let example_xml = to_canonical_string(&synthesize_example(&root_tag, &spec.payload_type));
        let prompt_fragment = synthesize_prompt_fragment(
            &spec.name,
            &spec.description,
            &spec.payload_type,
            &example_xml,
        );

        let listener = Arc::new(Listener {
            name: spec.name,
            description: spec.description,
            payload_type: Arc::new(spec.payload_type),
            handler: spec.handler,
            is_agent: spec.is_agent,
            peers: spec.peers,
            broadcast: spec.broadcast,
            root_tag: root_tag.clone(),
            schema_xsd,
            example_xml,
            prompt_fragment,
            timeout_secs: spec.timeout_secs,
        });

        let mut by_name = current.by_name.clone();
        let mut by_root = current.by_root.clone();
        by_name.insert(listener.name.clone(), listener.clone());
        by_root.entry(root_tag).or_default().push(listener.clone());

        *state = Arc::new(RegistrySnapshot { by_name, by_root });
        Ok(listener)
    }

    /// Remove a listener atomically. Returns false when it was not present.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut state = self.state.write().await;
        let current = state.as_ref();
        let Some(listener) = current.by_name.get(name) else {
            return false;
        };
        let root_tag = listener.root_tag.clone();

        let mut by_name = current.by_name.clone();
        let mut by_root = current.by_root.clone();
        by_name.shift_remove(name);
        if let Some(entries) = by_root.get_mut(&root_tag) {
            entries.retain(|l| l.name != name);
            if entries.is_empty() {
                by_root.remove(&root_tag);
            }
        }

        *state = Arc::new(RegistrySnapshot { by_name, by_root });
        true
    }
}

/// Prompt fragment: capability name, description, field table, example, and
/// the response-semantics statement.
fn synthesize_prompt_fragment(
    name: &str,
    description: &str,
    desc: &PayloadDescriptor,
    example_xml: &str,
) -> String {
    let mut out = format!("## Capability: {name}\n\n{description}\n\n");
    out.push_str("| field | type | doc |\n|---|---|---|\n");
    for (field_name, field) in &desc.fields {
        out.push_str(&format!(
            "| {field_name} | {} | {} |\n",
            field.kind.display_name(),
            field.doc.as_deref().unwrap_or("")
        ));
    }
    out.push_str("\nExample payload:\n\n");
    out.push_str(example_xml);
    out.push('\n');
    out.push('\n');
    out.push_str(RESPONSE_SEMANTICS_WARNING);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyp_core::descriptor::FieldKind;
    use polyp_core::handler::FnHandler;

    fn noop_handler() -> Arc<dyn Handler> {
        FnHandler::shared(|_payload, _meta| async move { Ok(None) })
    }

    fn text_payload(type_name: &str) -> PayloadDescriptor {
        PayloadDescriptor::new(type_name).with_kind("text", FieldKind::Text)
    }

    fn spec(name: &str) -> ListenerSpec {
        ListenerSpec::new(
            name,
            format!("The {name} capability"),
            text_payload("Input"),
            noop_handler(),
        )
    }

    #[tokio::test]
    async fn test_register_derives_root_tag_and_artifacts() {
        let registry = Registry::new();
        let listener = registry
            .register(ListenerSpec::new(
                "calculator.add",
                "Adds numbers",
                PayloadDescriptor::new("AddPayload")
                    .with_kind("a", FieldKind::Integer)
                    .with_kind("b", FieldKind::Integer),
                noop_handler(),
            ))
            .await
            .unwrap();

        assert_eq!(listener.root_tag, "calculator.add.addpayload");
        assert!(listener.schema_xsd.contains("calculator.add.addpayload"));
        assert!(listener.example_xml.contains("<a>0</a>"));
        assert!(listener.prompt_fragment.contains("Adds numbers"));
        assert!(listener
            .prompt_fragment
            .contains(RESPONSE_SEMANTICS_WARNING));
    }

    #[tokio::test]
    async fn test_register_refuses_empty_description() {
        let registry = Registry::new();
        let result = registry
            .register(ListenerSpec::new(
                "x",
                "   ",
                text_payload("Input"),
                noop_handler(),
            ))
            .await;
        assert!(matches!(
            result,
            Err(RegisterError::MissingDescription { .. })
        ));
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_refuses_duplicate_name() {
        let registry = Registry::new();
        registry.register(spec("echo")).await.unwrap();
        assert!(matches!(
            registry.register(spec("echo")).await,
            Err(RegisterError::DuplicateName { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_refuses_root_tag_collision() {
        let registry = Registry::new();
        registry.register(spec("echo")).await.unwrap();
        // Same derived root tag via a name that lowercases identically.
        let result = registry
            .register(ListenerSpec::new(
                "Echo",
                "Shouty duplicate",
                text_payload("Input"),
                noop_handler(),
            ))
            .await;
        assert!(matches!(
            result,
            Err(RegisterError::RootTagCollision { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_refuses_unknown_peer() {
        let registry = Registry::new();
        let result = registry
            .register(spec("greeter").with_peers(["shouter"]))
            .await;
        assert!(matches!(result, Err(RegisterError::UnknownPeer { .. })));
        // Transactional: nothing registered.
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_allows_self_peer() {
        let registry = Registry::new();
        let result = registry
            .register(spec("looper").with_peers(["looper"]).as_agent())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_group_shares_root_tag() {
        let registry = Registry::new();
        registry
            .register(
                ListenerSpec::new(
                    "search.google",
                    "Google search",
                    text_payload("Query"),
                    noop_handler(),
                )
                .broadcast(),
            )
            .await
            .unwrap();
        let bing = registry
            .register(
                ListenerSpec::new(
                    "search.bing",
                    "Bing search",
                    text_payload("Query"),
                    noop_handler(),
                )
                .broadcast(),
            )
            .await
            .unwrap();

        assert_eq!(bing.root_tag, "search.query");
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.lookup_by_root("search.query").len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_refuses_shape_mismatch() {
        let registry = Registry::new();
        registry
            .register(
                ListenerSpec::new(
                    "search.google",
                    "Google search",
                    text_payload("Query"),
                    noop_handler(),
                )
                .broadcast(),
            )
            .await
            .unwrap();
        let result = registry
            .register(
                ListenerSpec::new(
                    "search.bing",
                    "Bing search",
                    PayloadDescriptor::new("Query")
                        .with_kind("text", FieldKind::Text)
                        .with_kind("limit", FieldKind::Integer),
                    noop_handler(),
                )
                .broadcast(),
            )
            .await;
        assert!(matches!(
            result,
            Err(RegisterError::BroadcastShapeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_broadcast_requires_group_prefix() {
        let registry = Registry::new();
        let result = registry
            .register(
                ListenerSpec::new("solo", "No group", text_payload("Query"), noop_handler())
                    .broadcast(),
            )
            .await;
        assert!(matches!(
            result,
            Err(RegisterError::BroadcastWithoutGroup { .. })
        ));
    }

    #[tokio::test]
    async fn test_agent_may_not_broadcast() {
        let registry = Registry::new();
        let result = registry
            .register(spec("agents.planner").as_agent().broadcast())
            .await;
        assert!(matches!(result, Err(RegisterError::AgentBroadcast { .. })));
    }

    #[tokio::test]
    async fn test_unregister_removes_lookup_paths() {
        let registry = Registry::new();
        let listener = registry.register(spec("echo")).await.unwrap();
        assert!(registry.unregister("echo").await);

        let snapshot = registry.snapshot().await;
        assert!(snapshot.lookup_by_name("echo").is_none());
        assert!(snapshot.lookup_by_root(&listener.root_tag).is_empty());
        assert!(!registry.unregister("echo").await);
    }

    #[tokio::test]
    async fn test_snapshot_survives_unregistration() {
        let registry = Registry::new();
        registry.register(spec("echo")).await.unwrap();
        let snapshot = registry.snapshot().await;
        registry.unregister("echo").await;
        // The dispatch-held snapshot still sees the listener.
        assert!(snapshot.lookup_by_name("echo").is_some());
        assert!(registry.snapshot().await.lookup_by_name("echo").is_none());
    }

    #[tokio::test]
    async fn test_usage_instructions_concatenates_peer_fragments() {
        let registry = Registry::new();
        registry.register(spec("shouter")).await.unwrap();
        registry.register(spec("whisperer")).await.unwrap();
        let greeter = registry
            .register(
                spec("greeter")
                    .as_agent()
                    .with_peers(["shouter", "whisperer"]),
            )
            .await
            .unwrap();

        let snapshot = registry.snapshot().await;
        let instructions = snapshot.usage_instructions_for(&greeter);
        let shouter_pos = instructions.find("## Capability: shouter").unwrap();
        let whisperer_pos = instructions.find("## Capability: whisperer").unwrap();
        assert!(shouter_pos < whisperer_pos);
        assert!(instructions.ends_with(RESPONSE_SEMANTICS_WARNING));
    }

    #[tokio::test]
    async fn test_usage_instructions_empty_without_peers() {
        let registry = Registry::new();
        let echo = registry.register(spec("echo")).await.unwrap();
        let snapshot = registry.snapshot().await;
        assert!(snapshot.usage_instructions_for(&echo).is_empty());
    }
}
