//! ChatML prompt layout.

pub const SYSTEM_TURN: &str = "<|im_start|>system";
pub const USER_TURN: &str = "<|im_start|>user";
pub const ASSISTANT_TURN: &str = "<|im_start|>assistant";
pub const END_OF_TURN: &str = "<|im_end|>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    persona: String,
}

impl PromptTemplate {
    pub fn new(persona: impl Into<String>) -> Self { Self { persona: persona.into() } }

    pub fn persona(&self) -> &str { &self.persona }

    /// Persona followed by the retrieved context, if any.
    pub fn system_prompt(&self, context: &str) -> String {
        let context = context.trim();
        if context.is_empty() {
            self.persona.clone()
        } else {
            format!("{}\n\nContext:\n{context}", self.persona)
        }
    }

    /// Full prompt ending with an open assistant turn.
    pub fn render(system_prompt: &str, question: &str) -> String {
        format!(
            "{SYSTEM_TURN}\n{system_prompt}{END_OF_TURN}\n{USER_TURN}\n{}{END_OF_TURN}\n{ASSISTANT_TURN}\n",
            question.trim()
        )
    }
}
