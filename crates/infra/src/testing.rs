//! Test doubles shared by the runner and coordinator tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use adprompt_ai::{GenerationError, TextGenerator};

/// What a scripted generator does for one call.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Reply(String),
    Fail(GenerationError),
    Panic,
}

/// Generator driven by a closure of `(prompt, call_number)`; call numbers are
/// 1-based and counted across all prompts.
pub(crate) struct ScriptedGenerator<F> {
    respond: F,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl<F> ScriptedGenerator<F>
where
    F: Fn(&str, usize) -> Step + Send + Sync,
{
    pub(crate) fn new(respond: F) -> Self {
        Self {
            respond,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl<F> TextGenerator for ScriptedGenerator<F>
where
    F: Fn(&str, usize) -> Step + Send + Sync,
{
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((prompt.to_string(), Instant::now()));
            calls.len()
        };
        match (self.respond)(prompt, call) {
            Step::Reply(text) => Ok(text),
            Step::Fail(err) => Err(err),
            Step::Panic => panic!("scripted generator panic on call {call}"),
        }
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

/// A well-formed, fenced model answer.
pub(crate) fn answer(tag: &str) -> String {
    format!(
        "```json\n{{\"part1_prompt\": \"{tag} part one\", \"part2_prompt\": \"{tag} part two\"}}\n```"
    )
}
