//! Integration tests against the live OpenRouter API.
//!
//! These tests require OPENROUTER_API_KEY in the environment.
//!
//! Run with: cargo test --features integ_test --test live_services

#[cfg(feature = "integ_test")]
mod tests {
    use startup_advisor::format::{FormatOptions, format_response};
    use startup_advisor::openrouter::{Client, Message};
    use startup_advisor::persona::Persona;

    fn api_key() -> Option<String> {
        std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty())
    }

    #[tokio::test]
    async fn test_persona_answer_formats_cleanly() {
        let Some(key) = api_key() else {
            eprintln!("Skipping test: OPENROUTER_API_KEY not set");
            return;
        };
        let client = Client::new(key).expect("client");
        let persona = Persona::Investor;
        let messages = [
            Message::system(persona.system_prompt()),
            Message::user("We sell scheduling software to dentists. Is the market big enough?"),
        ];

        let completion = client
            .chat(persona.model(), &messages, 400, 0.7)
            .await
            .expect("completion");
        assert!(!completion.content.trim().is_empty());

        let formatted = format_response(&completion.content, persona, &FormatOptions::default());
        assert!(formatted.starts_with("💰 Response:\n\n"));
        assert!(!formatted.contains("**"));
    }

    #[tokio::test]
    async fn test_bad_key_maps_to_auth_message() {
        if api_key().is_none() {
            eprintln!("Skipping test: OPENROUTER_API_KEY not set");
            return;
        }
        let client = Client::new("sk-or-invalid".into()).expect("client");
        let err = client
            .chat("openai/gpt-3.5-turbo", &[Message::user("hi")], 10, 0.0)
            .await
            .expect_err("invalid key must fail");
        assert!(err.user_message().contains("Authentication"), "got {err}");
    }
}
