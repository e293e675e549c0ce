//! GenAI bot server binary.
//! Run with: cargo run --bin genai-bot-server

use std::process::ExitCode;

use genai_bot::start_genai_bot;

fn main() -> ExitCode {
    start_genai_bot::run()
}
