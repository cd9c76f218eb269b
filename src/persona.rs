//! The two advisor personas and their prompts.

use serde::{Deserialize, Serialize};

/// Which advisor produced (or should produce) a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Persona {
    #[default]
    #[serde(rename = "pm")]
    ProductManager,
    #[serde(rename = "vc")]
    Investor,
}

const MODEL: &str = "perplexity/sonar-pro";

const PM_PROMPT: &str = r#"You are Lenny Rachitsky, product strategy expert. Keep responses concise but impactful.

Your approach:
- Ask 3-5 sharp questions that challenge assumptions
- Reference one specific example (Airbnb, Notion, Linear)
- Use ONE framework per response
- End with ONE clear action item

Core frameworks:
1. Jobs-to-be-Done: What job are users hiring you for?
2. Growth Loops: Content, Viral, or Sales?
3. Retention: What's your habit moment?
4. RICE: Reach x Impact x Confidence / Effort

Style: Direct and challenging. No fluff. Make every word count."#;

const VC_PROMPT: &str = r#"You are a seed-stage VC. Be direct and numbers-focused.

Your approach:
- Ask 3-5 diligence questions
- Challenge with specific market data
- Focus on unit economics
- End with "What needs to be true for $1B?"

Key areas:
1. TAM: Show me the math
2. Why Now: What changed?
3. Competition: Who raised? Why not them?
4. Unit Economics: CAC, LTV, Payback?

Style: Skeptical but fair. Use specific examples. Keep it brief."#;

impl Persona {
    pub const ALL: [Persona; 2] = [Persona::ProductManager, Persona::Investor];

    /// Short tag used in storage rows, commands and callback data.
    pub fn tag(&self) -> &'static str {
        match self {
            Persona::ProductManager => "pm",
            Persona::Investor => "vc",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "pm" => Some(Persona::ProductManager),
            "vc" => Some(Persona::Investor),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Persona::ProductManager => "🚀 Product Manager",
            Persona::Investor => "🦈 Seed VC / Angel Investor",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Persona::ProductManager => "Product strategy expert based on Lenny Rachitsky's frameworks",
            Persona::Investor => "Early-stage investor with current market insights",
        }
    }

    pub fn model(&self) -> &'static str {
        MODEL
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Persona::ProductManager => PM_PROMPT,
            Persona::Investor => VC_PROMPT,
        }
    }

    /// Marker placed in front of every formatted response.
    pub fn glyph(&self) -> &'static str {
        match self {
            Persona::ProductManager => "🚀",
            Persona::Investor => "💰",
        }
    }

    /// Conversation starters shown after the persona is selected.
    pub fn start_prompts(&self) -> [&'static str; 4] {
        match self {
            Persona::ProductManager => [
                "What problem are you solving?",
                "Who is your target user?",
                "What's your current product stage?",
                "What are you struggling with?",
            ],
            Persona::Investor => [
                "What's your business model?",
                "How big is your market?",
                "What's your competitive advantage?",
                "What metrics are you tracking?",
            ],
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
