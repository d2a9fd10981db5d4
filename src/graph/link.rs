//! Typed dependency links between node outputs and inputs.

/// A directed dependency from one node's output to another node's input.
///
/// The `collapse`/`expand` cardinality flags are declarative metadata
/// consumed by node logic; the execution core carries them but does not
/// interpret them. The owning network is set exactly once, when the link is
/// first added to a [`Network`](crate::network::Network).
#[derive(Debug, Clone)]
pub struct Link {
    id: String,
    from_node: String,
    from_output: String,
    to_node: String,
    to_input: String,
    collapse: bool,
    expand: bool,
    network: Option<String>,
}

impl Link {
    pub fn new(
        id: impl Into<String>,
        from_node: impl Into<String>,
        from_output: impl Into<String>,
        to_node: impl Into<String>,
        to_input: impl Into<String>,
    ) -> Self {
        Link {
            id: id.into(),
            from_node: from_node.into(),
            from_output: from_output.into(),
            to_node: to_node.into(),
            to_input: to_input.into(),
            collapse: false,
            expand: false,
            network: None,
        }
    }

    /// Set the cardinality-adjustment flags.
    pub fn with_flags(mut self, collapse: bool, expand: bool) -> Self {
        self.collapse = collapse;
        self.expand = expand;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from_node(&self) -> &str {
        &self.from_node
    }

    pub fn from_output(&self) -> &str {
        &self.from_output
    }

    pub fn to_node(&self) -> &str {
        &self.to_node
    }

    pub fn to_input(&self) -> &str {
        &self.to_input
    }

    pub fn collapse(&self) -> bool {
        self.collapse
    }

    pub fn expand(&self) -> bool {
        self.expand
    }

    /// Id of the network this link belongs to, once added.
    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub(crate) fn set_network(&mut self, network: &str) {
        self.network = Some(network.to_string());
    }
}
