//! Macro-to-text encoding with an injectable handler registry
//!
//! The registry maps macro and environment names to rendering handlers; the
//! builder receives it at construction, so alternate handler sets can be
//! plugged in without touching any shared state.

use std::collections::HashMap;
use std::sync::Arc;

use super::nodes::{parse, EnvNode, MacroNode, TexNode};

/// Renders one macro invocation to text
pub type MacroHandler = Arc<dyn Fn(&MacroNode, &TextEncoder) -> String + Send + Sync>;
/// Renders one environment to text
pub type EnvHandler = Arc<dyn Fn(&EnvNode, &TextEncoder) -> String + Send + Sync>;

/// Curated handler registry for macro-to-text encoding
#[derive(Clone, Default)]
pub struct MacroRegistry {
    macros: HashMap<String, MacroHandler>,
    environments: HashMap<String, EnvHandler>,
}

impl MacroRegistry {
    pub fn register_macro(
        &mut self,
        name: &str,
        handler: impl Fn(&MacroNode, &TextEncoder) -> String + Send + Sync + 'static,
    ) {
        self.macros.insert(name.to_string(), Arc::new(handler));
    }

    pub fn register_environment(
        &mut self,
        name: &str,
        handler: impl Fn(&EnvNode, &TextEncoder) -> String + Send + Sync + 'static,
    ) {
        self.environments.insert(name.to_string(), Arc::new(handler));
    }

    pub fn macro_handler(&self, name: &str) -> Option<&MacroHandler> {
        self.macros.get(name)
    }

    pub fn environment_handler(&self, name: &str) -> Option<&EnvHandler> {
        self.environments.get(name)
    }
}

/// Handler producing `<name. key>` labels for reference-like macros
fn labeller(name: &'static str) -> impl Fn(&MacroNode, &TextEncoder) -> String {
    move |node, encoder| match node.main_arg() {
        Some(arg) => format!("<{}. {}>", name, encoder.encode(arg)),
        None => format!("<{name}>"),
    }
}

/// The default curated registry
pub fn default_registry() -> MacroRegistry {
    let mut registry = MacroRegistry::default();

    registry.register_macro("cite", labeller("cit"));
    registry.register_macro("citep", labeller("cit"));
    registry.register_macro("citet", labeller("cit"));
    registry.register_macro("ref", labeller("ref"));
    registry.register_macro("eqref", labeller("ref"));
    registry.register_macro("label", labeller("label"));

    registry.register_macro("href", |node, encoder| {
        let url = node.args.first().map(|a| encoder.encode(a)).unwrap_or_default();
        let text = node.args.get(1).map(|a| encoder.encode(a)).unwrap_or_default();
        format!("[{text}]({url})")
    });
    registry.register_macro("url", |node, _| {
        node.main_arg().unwrap_or_default().to_string()
    });
    registry.register_macro("item", |node, encoder| match node.options.first() {
        Some(opt) => encoder.encode(opt),
        None => "- ".to_string(),
    });
    registry.register_macro("includegraphics", |_, _| "<image>".to_string());

    // Emphasis macros keep their argument text
    for name in ["emph", "textbf", "textit", "texttt", "textsc", "underline"] {
        registry.register_macro(name, |node, encoder| {
            node.main_arg().map(|a| encoder.encode(a)).unwrap_or_default()
        });
    }

    // Symbol macros
    registry.register_macro("\\", |_, _| "\n".to_string());
    for symbol in ["&", "%", "$", "#", "_", "{", "}"] {
        registry.register_macro(symbol, move |_, _| symbol.to_string());
    }

    // List environments render as their body on a fresh line
    for name in ["itemize", "enumerate", "exenumerate"] {
        registry.register_environment(name, |env, encoder| {
            format!("\n{}", encoder.render_nodes(&env.children))
        });
    }

    registry
}

/// Text encoder over a macro registry
#[derive(Clone)]
pub struct TextEncoder {
    registry: Arc<MacroRegistry>,
}

impl TextEncoder {
    pub fn new(registry: MacroRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Encode raw LaTeX to text. Never fails: inputs that cannot be
    /// meaningfully rendered come back close to verbatim.
    pub fn encode(&self, latex: &str) -> String {
        let nodes = parse(latex);
        self.render_nodes(&nodes)
    }

    pub fn render_nodes(&self, nodes: &[TexNode]) -> String {
        nodes.iter().map(|n| self.render_node(n)).collect()
    }

    pub fn render_node(&self, node: &TexNode) -> String {
        match node {
            TexNode::Text(t) => t.clone(),
            TexNode::Macro(m) => self.render_macro(m),
            TexNode::Environment(env) => self.render_environment(env),
        }
    }

    fn render_macro(&self, node: &MacroNode) -> String {
        if let Some(handler) = self.registry.macro_handler(&node.name) {
            return handler(node, self);
        }
        // Unknown macros degrade to their content argument; argless ones
        // (formatting switches, spacing) disappear.
        match node.main_arg() {
            Some(arg) => self.encode(arg),
            None => String::new(),
        }
    }

    fn render_environment(&self, env: &EnvNode) -> String {
        if let Some(handler) = self.registry.environment_handler(&env.name) {
            return handler(env, self);
        }
        self.render_nodes(&env.children)
    }

    /// Normalize whitespace around punctuation in rendered text
    pub fn clean(&self, text: &str) -> String {
        static PUNCT: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        let re = PUNCT.get_or_init(|| {
            regex::Regex::new(r"[ \t]*([.,;:!?])[ \t]+").expect("valid punctuation pattern")
        });
        re.replace_all(text.trim(), "$1 ").into_owned()
    }
}

impl Default for TextEncoder {
    fn default() -> Self {
        Self::new(default_registry())
    }
}
