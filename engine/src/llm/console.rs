//! Console provider
//!
//! Lets an operator play the model: the conversation history is printed to
//! stdout and the next assistant message is read from stdin. Useful for
//! rehearsing a questionnaire without an API key.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

use super::{LLMError, LLMProvider, Message};

/// Line reader over stdin that several readers can take turns on
pub type SharedStdin = Arc<Mutex<BufReader<Stdin>>>;

pub fn shared_stdin() -> SharedStdin {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin())))
}

pub struct ConsoleProvider {
    stdin: SharedStdin,
}

impl ConsoleProvider {
    pub fn new() -> Self {
        Self::with_input(shared_stdin())
    }

    /// Read replies from a reader that is also used elsewhere
    pub fn with_input(stdin: SharedStdin) -> Self {
        Self { stdin }
    }
}

impl Default for ConsoleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for ConsoleProvider {
    fn name(&self) -> &str {
        "console"
    }

    async fn generate(&self, messages: &[Message]) -> super::Result<String> {
        println!("----- context ({} messages) -----", messages.len());
        for msg in messages {
            println!("[{}] {}", msg.role, msg.content);
        }
        println!("----- enter the doctor's reply -----");

        let mut line = String::new();
        let read = self
            .stdin
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| LLMError::ProviderUnavailable(e.to_string()))?;

        if read == 0 {
            return Err(LLMError::ProviderUnavailable("stdin closed".to_string()));
        }
        Ok(line.trim_end().to_string())
    }
}
