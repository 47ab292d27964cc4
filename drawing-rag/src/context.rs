//! Prompt assembly with a token-budgeted conversation history.
//!
//! A prompt is the system instruction, then as much recent history as fits
//! the budget, then one user message holding the labeled context snippets
//! and the question. Tokens are estimated as `ceil(chars / chars_per_token)`.
//!
//! History is walked newest to oldest and stops at the first turn that
//! would push the total over budget, so the most recent turns always win
//! and nothing older than a dropped turn is kept. Included turns are then
//! emitted oldest first.

use crate::config::RagConfig;
use crate::document::{ChatMessage, ConversationTurn, RetrievedMatch};

/// Instruction sent as the system message of every prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant specialized in architectural and \
construction drawings. Answer using only the provided context from drawings, notes, legends, \
schedules and specifications. Always name the source drawing for every fact you use, and say \
which drawing each value comes from when sources disagree or are ambiguous. Keep measurements \
in their original units and quote scales verbatim. If the context is insufficient or you are \
unsure, say so and suggest how to verify on the drawings.";

/// Assembled messages ready for the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// System message, included history, then the user message.
    pub messages: Vec<ChatMessage>,
    /// Estimated size of `messages`.
    pub estimated_tokens: usize,
    /// Number of history turns included.
    pub history_included: usize,
}

/// Builds [`Prompt`]s from retrieved matches, history and the query.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    system_prompt: String,
    token_budget: usize,
    chars_per_token: usize,
}

impl ContextAssembler {
    pub fn new(config: &RagConfig) -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            token_budget: config.history_token_budget,
            chars_per_token: config.chars_per_token.max(1),
        }
    }

    /// Replace the system instruction.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Estimated token count of `text`.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    /// Label each match with its drawing and 1-based page, separated by blank lines.
    pub fn format_context(matches: &[RetrievedMatch]) -> String {
        matches
            .iter()
            .map(|m| {
                format!("[Source: {}, page {}]\n{}", m.metadata.source, m.metadata.page + 1, m.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The final user message: context block followed by the question.
    pub fn user_message(matches: &[RetrievedMatch], query: &str) -> String {
        format!("Context:\n{}\n\nQuestion: {query}", Self::format_context(matches))
    }

    /// Build the prompt for `query`.
    ///
    /// If the system prompt, context and query alone exceed the budget, no
    /// history is included; the current question is never dropped.
    pub fn assemble(
        &self,
        matches: &[RetrievedMatch],
        history: &[ConversationTurn],
        query: &str,
    ) -> Prompt {
        let user = Self::user_message(matches, query);
        let mut total = self.estimate_tokens(&self.system_prompt) + self.estimate_tokens(&user);

        let mut included = Vec::new();
        for turn in history.iter().rev() {
            let cost = self.estimate_tokens(&turn.text);
            if total + cost > self.token_budget {
                break;
            }
            total += cost;
            included.push(turn);
        }
        included.reverse();

        let history_included = included.len();
        let mut messages = Vec::with_capacity(history_included + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(included.into_iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(user));

        Prompt { messages, estimated_tokens: total, history_included }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::document::{BoundingBox, Fragment, Role, SourceDocument};

    fn matched(name: &str, page: u32, text: &str, score: f32) -> RetrievedMatch {
        let source = SourceDocument::from_path(format!("/drawings/{name}"));
        let fragment = Fragment::native(&source, page, BoundingBox::new(0.0, 0.0, 1.0, 1.0), text);
        RetrievedMatch { id: format!("{name}-{page}"), score, text: fragment.text, metadata: fragment.metadata }
    }

    fn assembler(budget: usize) -> ContextAssembler {
        let config = RagConfig::builder().history_token_budget(budget).build().unwrap();
        ContextAssembler::new(&config).with_system_prompt("sys")
    }

    #[test]
    fn estimate_rounds_up() {
        let assembler = assembler(100);
        assert_eq!(assembler.estimate_tokens(""), 0);
        assert_eq!(assembler.estimate_tokens("abcd"), 1);
        assert_eq!(assembler.estimate_tokens("abcde"), 2);
    }

    #[test]
    fn context_labels_source_and_one_based_page() {
        let context = ContextAssembler::format_context(&[
            matched("A-101.pdf", 0, "Wall thickness: 300mm", 0.9),
            matched("S-201.pdf", 3, "W12x26", 0.8),
        ]);
        assert_eq!(
            context,
            "[Source: A-101.pdf, page 1]\nWall thickness: 300mm\n\n[Source: S-201.pdf, page 4]\nW12x26"
        );
    }

    #[test]
    fn empty_history_is_system_plus_user() {
        let matches = [matched("A-101.pdf", 0, "Wall thickness: 300mm", 0.9)];
        let prompt = assembler(8000).assemble(&matches, &[], "what is the wall width?");

        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0], ChatMessage::system("sys"));
        assert_eq!(prompt.messages[1].role, Role::User);
        assert_eq!(
            prompt.messages[1].content,
            "Context:\n[Source: A-101.pdf, page 1]\nWall thickness: 300mm\n\nQuestion: what is the wall width?"
        );
        assert_eq!(prompt.history_included, 0);
    }

    #[test]
    fn keeps_newest_turns_in_chronological_order() {
        let history = vec![
            ConversationTurn::user("a".repeat(40)),      // 10 tokens
            ConversationTurn::assistant("b".repeat(40)), // 10 tokens
            ConversationTurn::user("c".repeat(8)),       // 2 tokens
            ConversationTurn::assistant("d".repeat(8)),  // 2 tokens
        ];
        // seed: "sys" = 1, user message "Context:\n\n\nQuestion: q" = 22 chars = 6
        let prompt = assembler(21).assemble(&[], &history, "q");

        assert_eq!(prompt.history_included, 3);
        let contents: Vec<&str> = prompt.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1], "b".repeat(40));
        assert_eq!(contents[2], "c".repeat(8));
        assert_eq!(contents[3], "d".repeat(8));
        assert_eq!(prompt.messages[1].role, Role::Assistant);
        assert_eq!(prompt.estimated_tokens, 1 + 6 + 2 + 2 + 10);
    }

    #[test]
    fn stops_at_first_turn_that_does_not_fit() {
        let history = vec![
            ConversationTurn::user("tiny"),
            ConversationTurn::assistant("x".repeat(400)),
            ConversationTurn::user("recent"),
        ];
        let prompt = assembler(20).assemble(&[], &history, "q");

        // "tiny" would fit but lies behind the oversized turn.
        assert_eq!(prompt.history_included, 1);
        assert_eq!(prompt.messages[1].content, "recent");
    }

    #[test]
    fn oversized_seed_drops_all_history() {
        let matches = [matched("A-101.pdf", 0, &"z".repeat(1000), 0.9)];
        let prompt = assembler(10).assemble(&matches, &[ConversationTurn::user("hi")], "q");
        assert_eq!(prompt.history_included, 0);
        assert_eq!(prompt.messages.len(), 2);
    }

    proptest! {
        #[test]
        fn history_never_exceeds_budget(
            budget in 30usize..400,
            turns in prop::collection::vec("[a-z ]{0,120}", 0..12),
        ) {
            let history: Vec<ConversationTurn> = turns
                .iter()
                .enumerate()
                .map(|(i, t)| if i % 2 == 0 { ConversationTurn::user(t.clone()) } else { ConversationTurn::assistant(t.clone()) })
                .collect();
            let assembler = assembler(budget);
            let prompt = assembler.assemble(&[], &history, "how long is the beam?");

            let seed = prompt.estimated_tokens
                - prompt.messages[1..prompt.messages.len() - 1]
                    .iter()
                    .map(|m| assembler.estimate_tokens(&m.content))
                    .sum::<usize>();
            prop_assert!(prompt.estimated_tokens <= budget.max(seed));
            prop_assert_eq!(prompt.messages.len(), prompt.history_included + 2);

            // Included turns are a suffix of the history, in order.
            let tail = &history[history.len() - prompt.history_included..];
            for (message, turn) in prompt.messages[1..].iter().zip(tail) {
                prop_assert_eq!(&message.content, &turn.text);
            }
        }
    }
}
