//! Message processors applied to text before it is broadcast.
//!
//! A [`ProcessorChain`] is an ordered list of [`MessageProcessor`]s built
//! at startup and handed to the registry. Every room created by that
//! registry runs each text message through the chain, in registration
//! order, inside its coordination loop. All recipients (and the history)
//! therefore see the same processed text.

use std::fmt;
use std::sync::Arc;

use chatml_protocol::Message;

/// Transforms the content of a text message.
pub trait MessageProcessor: Send + Sync + 'static {
    /// Short identifier, used in logs and on the command line.
    fn name(&self) -> &'static str;

    /// One-line human description.
    fn description(&self) -> &'static str;

    /// Experimental processors are skipped unless the chain opts in.
    fn is_experimental(&self) -> bool {
        false
    }

    /// Returns the transformed content.
    fn process(&self, content: &str) -> String;
}

/// Converts message content to upper case.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uppercase;

impl MessageProcessor for Uppercase {
    fn name(&self) -> &'static str {
        "uppercase"
    }

    fn description(&self) -> &'static str {
        "Converts message content to uppercase"
    }

    fn process(&self, content: &str) -> String {
        content.to_uppercase()
    }
}

/// Ordered list of processors.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn MessageProcessor>>,
    allow_experimental: bool,
}

impl ProcessorChain {
    /// Creates an empty chain. An empty chain leaves messages untouched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a processor (builder style).
    pub fn with(mut self, processor: impl MessageProcessor) -> Self {
        self.register(processor);
        self
    }

    /// Lets experimental processors run.
    pub fn allow_experimental(mut self, allow: bool) -> Self {
        self.allow_experimental = allow;
        self
    }

    /// Appends a processor.
    pub fn register(&mut self, processor: impl MessageProcessor) {
        self.processors.push(Arc::new(processor));
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// `(name, description)` of every registered processor, in order.
    pub fn descriptions(&self) -> Vec<(&'static str, &'static str)> {
        self.processors
            .iter()
            .map(|p| (p.name(), p.description()))
            .collect()
    }

    /// Runs a message through the chain. Presence messages pass through
    /// unchanged.
    pub fn apply(&self, message: Message) -> Message {
        match message {
            Message::Text(mut text) => {
                for processor in self.active() {
                    text.content = processor.process(&text.content);
                }
                Message::Text(text)
            }
            other => other,
        }
    }

    fn active(&self) -> impl Iterator<Item = &Arc<dyn MessageProcessor>> {
        self.processors
            .iter()
            .filter(|p| self.allow_experimental || !p.is_experimental())
    }
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("allow_experimental", &self.allow_experimental)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatml_protocol::MemberInfo;

    struct Exclaim;

    impl MessageProcessor for Exclaim {
        fn name(&self) -> &'static str {
            "exclaim"
        }

        fn description(&self) -> &'static str {
            "Appends an exclamation mark"
        }

        fn is_experimental(&self) -> bool {
            true
        }

        fn process(&self, content: &str) -> String {
            format!("{content}!")
        }
    }

    fn text(content: &str) -> Message {
        Message::text(MemberInfo::new("alice", "Alice"), content)
    }

    fn content(message: &Message) -> &str {
        &message.as_text().unwrap().content
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = ProcessorChain::new();
        assert!(chain.is_empty());
        assert_eq!(content(&chain.apply(text("hi"))), "hi");
    }

    #[test]
    fn test_uppercase() {
        let chain = ProcessorChain::new().with(Uppercase);
        assert_eq!(content(&chain.apply(text("hi there"))), "HI THERE");
    }

    #[test]
    fn test_experimental_skipped_by_default() {
        let chain = ProcessorChain::new().with(Uppercase).with(Exclaim);
        assert_eq!(content(&chain.apply(text("hi"))), "HI");

        let chain = chain.allow_experimental(true);
        assert_eq!(content(&chain.apply(text("hi"))), "HI!");
    }

    #[test]
    fn test_applies_in_registration_order() {
        let chain = ProcessorChain::new()
            .with(Exclaim)
            .with(Uppercase)
            .allow_experimental(true);
        assert_eq!(content(&chain.apply(text("ok"))), "OK!");
        assert_eq!(
            chain.descriptions().iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            ["exclaim", "uppercase"]
        );
    }

    #[test]
    fn test_presence_untouched() {
        let chain = ProcessorChain::new().with(Uppercase);
        let presence = Message::presence(vec![MemberInfo::new("bob", "bob")]);
        assert_eq!(chain.apply(presence.clone()), presence);
    }
}
