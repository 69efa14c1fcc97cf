//! `archie chat`: retrieval-augmented conversation over the paper collection.
//!
//! The model is given the Archie persona, a seeded greeting exchange, and
//! the `search_papers` tool. Each user turn may trigger any number of tool
//! calls (bounded by `[chat].max_tool_rounds`) before the model answers.
//! Only the user's input and the final answer are kept in the history.

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;

use crate::chat::{
    ChatCompletion, ChatHistory, ChatMessage, ChatReply, ChatRequest, ExecutionSettings,
    OpenAiChatClient, ToolDefinition,
};
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::search::PaperSearch;
use crate::store::SqliteCollection;
use crate::tools::{SearchPapersTool, ToolRegistry};

/// Name of the conversation function itself. Never offered to the model.
pub const CHAT_FUNCTION_NAME: &str = "chat";

/// Column width for printed replies.
pub const WRAP_WIDTH: usize = 90;

pub const USER_PROMPT: &str = "User:> ";

pub const SYSTEM_PROMPT: &str = "\
You are a chat bot. Your name is Archie and you have one goal: help people find \
answers to technical questions by relying on the latest research papers published \
on ArXiv. You communicate effectively in the style of a helpful librarian. You \
always make sure to include the ArXiV paper references in your responses. If you \
cannot find the answer in the papers, you will let the user know, but also provide \
the papers you did find to be most relevant. If the abstract of the paper does not \
specifically reference the user's inquiry, but you believe it might be relevant, \
you can still include it BUT you must make sure to mention that the paper might not \
directly address the user's inquiry. Make certain that the papers you link are from \
a specific search result.";

const GREETING_QUESTION: &str = "Hi there, who are you?";

const GREETING_REPLY: &str = "I am Archie, the ArXiV chat bot. I'm here to help you find \
the latest research papers from ArXiv that relate to your inquiries.";

/// History every conversation starts from: persona plus the greeting exchange.
pub fn seeded_history() -> ChatHistory {
    let mut history = ChatHistory::new();
    history.push(ChatMessage::system(SYSTEM_PROMPT));
    history.push(ChatMessage::user(GREETING_QUESTION));
    history.push(ChatMessage::assistant(GREETING_REPLY));
    history
}

/// A running conversation with the model.
pub struct ChatSession {
    client: Box<dyn ChatCompletion>,
    tools: ToolRegistry,
    history: ChatHistory,
    settings: ExecutionSettings,
    max_tool_rounds: usize,
}

impl ChatSession {
    pub fn new(
        client: Box<dyn ChatCompletion>,
        tools: ToolRegistry,
        settings: ExecutionSettings,
        max_tool_rounds: usize,
    ) -> Self {
        Self {
            client,
            tools,
            history: seeded_history(),
            settings,
            max_tool_rounds,
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Send one user turn and return the model's final answer.
    ///
    /// Tool calls are executed and fed back until the model answers in
    /// text. After `max_tool_rounds` rounds the model is asked once more
    /// with no tools on offer. The history is only updated on success.
    pub async fn ask(&mut self, input: &str) -> Result<String> {
        let mut turn: Vec<ChatMessage> = self.history.messages().to_vec();
        turn.push(ChatMessage::user(input));

        let definitions = self.tools.definitions(&[CHAT_FUNCTION_NAME]);
        let mut rounds = 0;

        let answer = loop {
            let offered: &[ToolDefinition] = if rounds < self.max_tool_rounds {
                &definitions
            } else {
                &[]
            };

            let ChatReply {
                content,
                tool_calls,
            } = self
                .client
                .complete(ChatRequest {
                    messages: &turn,
                    tools: offered,
                    settings: self.settings,
                })
                .await?;

            if tool_calls.is_empty() || offered.is_empty() {
                break content.unwrap_or_default();
            }

            rounds += 1;
            tracing::debug!(round = rounds, calls = tool_calls.len(), "model requested tools");

            turn.push(ChatMessage::assistant_tool_calls(content, tool_calls.clone()));
            for call in &tool_calls {
                let result = self.tools.invoke(call).await;
                turn.push(ChatMessage::tool_result(call.id.as_str(), result));
            }
        };

        self.history.push(ChatMessage::user(input));
        self.history.push(ChatMessage::assistant(answer.as_str()));
        Ok(answer)
    }
}

/// Outcome of reading one line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    Interrupted,
    Eof,
}

/// Source of user input lines.
pub trait LineInput {
    fn read_line(&mut self, prompt: &str) -> Result<ReadOutcome>;
}

/// Interactive terminal input with line editing and in-session history.
pub struct RustylineInput {
    editor: rustyline::DefaultEditor,
}

impl RustylineInput {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: rustyline::DefaultEditor::new()?,
        })
    }
}

impl LineInput for RustylineInput {
    fn read_line(&mut self, prompt: &str) -> Result<ReadOutcome> {
        use rustyline::error::ReadlineError;

        match self.editor.readline(prompt) {
            Ok(line) => {
                self.editor.add_history_entry(line.as_str()).ok();
                Ok(ReadOutcome::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(ReadOutcome::Interrupted),
            Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read–ask–print loop.
///
/// Ends cleanly on an empty line, `exit`, interrupt or end of input.
pub async fn run_chat_loop(
    session: &mut ChatSession,
    input: &mut dyn LineInput,
    out: &mut dyn Write,
) -> Result<()> {
    loop {
        let line = match input.read_line(USER_PROMPT)? {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Interrupted | ReadOutcome::Eof => break,
        };

        if line.trim().is_empty() || line == "exit" {
            break;
        }

        let answer = session.ask(&line).await?;

        writeln!(out)?;
        writeln!(out, "Archie:>\n\n{}", wrap_text(&answer, WRAP_WIDTH))?;
        writeln!(out)?;
        out.flush()?;
    }

    writeln!(out, "\n\nExiting chat...")?;
    Ok(())
}

/// `archie chat`: interactive conversation on the terminal.
pub async fn run_chat(config: &Config) -> Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let client = OpenAiChatClient::new(&config.chat)?;

    db::with_pool(config, |pool| async move {
        let collection = Arc::new(SqliteCollection::new(pool, config.db.collection.as_str())?);

        let mut tools = ToolRegistry::new();
        tools.register(Box::new(SearchPapersTool::new(PaperSearch::new(
            collection, embedder,
        ))));

        let mut session = ChatSession::new(
            Box::new(client),
            tools,
            ExecutionSettings::from(&config.chat),
            config.chat.max_tool_rounds,
        );

        let mut input = RustylineInput::new()?;
        let mut stdout = std::io::stdout();
        run_chat_loop(&mut session, &mut input, &mut stdout).await
    })
    .await
}

/// Wrap `text` to `width` columns.
///
/// Blank-line-separated paragraphs and single line breaks are wrapped
/// independently; both kinds of break survive in the output. Words longer
/// than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> String {
    text.split("\n\n")
        .map(|paragraph| {
            paragraph
                .split('\n')
                .map(|line| fill_line(line, width))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn fill_line(line: &str, width: usize) -> String {
    let width = width.max(1);
    let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();

    let mut lines: Vec<String> = Vec::new();
    let mut current = indent;
    let mut current_len = current.chars().count();
    let mut has_word = false;

    for word in line.split_whitespace() {
        let mut word = word;
        loop {
            let word_len = word.chars().count();
            let needed = current_len + word_len + usize::from(has_word);
            if needed <= width {
                if has_word {
                    current.push(' ');
                }
                current.push_str(word);
                current_len = needed;
                has_word = true;
                break;
            }
            if has_word {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
                has_word = false;
                continue;
            }

            // a single word wider than the remaining room
            let room = width.saturating_sub(current_len).max(1);
            let split_at = word
                .char_indices()
                .nth(room)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            current.push_str(&word[..split_at]);
            lines.push(std::mem::take(&mut current));
            current_len = 0;
            word = &word[split_at..];
            if word.is_empty() {
                break;
            }
        }
    }

    if has_word {
        lines.push(current);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Role, ToolCall};
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedInput(VecDeque<ReadOutcome>);

    impl ScriptedInput {
        fn lines(lines: &[&str]) -> Self {
            Self(
                lines
                    .iter()
                    .map(|l| ReadOutcome::Line(l.to_string()))
                    .collect(),
            )
        }
    }

    impl LineInput for ScriptedInput {
        fn read_line(&mut self, _prompt: &str) -> Result<ReadOutcome> {
            Ok(self.0.pop_front().unwrap_or(ReadOutcome::Eof))
        }
    }

    /// Replays canned replies and records how many tools each request offered.
    struct ScriptedChat {
        replies: Mutex<VecDeque<ChatReply>>,
        offered: Arc<Mutex<Vec<usize>>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<ChatReply>) -> (Self, Arc<Mutex<Vec<usize>>>) {
            let offered = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    replies: Mutex::new(replies.into()),
                    offered: offered.clone(),
                },
                offered,
            )
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedChat {
        async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatReply> {
            self.offered.lock().unwrap().push(request.tools.len());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| text("fallback")))
        }
    }

    struct CountingTool(Arc<Mutex<usize>>);

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "search_papers"
        }
        fn description(&self) -> &str {
            "test"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _params: Value) -> Result<Value> {
            *self.0.lock().unwrap() += 1;
            Ok(json!([]))
        }
    }

    fn text(s: &str) -> ChatReply {
        ChatReply {
            content: Some(s.to_string()),
            tool_calls: Vec::new(),
        }
    }

    fn tool_reply(id: &str) -> ChatReply {
        ChatReply {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: "search_papers".to_string(),
                arguments: r#"{"query":"rag"}"#.to_string(),
            }],
        }
    }

    fn settings() -> ExecutionSettings {
        ExecutionSettings {
            max_tokens: 7000,
            temperature: 0.7,
            top_p: 0.8,
        }
    }

    fn new_session(
        replies: Vec<ChatReply>,
        max_rounds: usize,
    ) -> (ChatSession, Arc<Mutex<Vec<usize>>>, Arc<Mutex<usize>>) {
        let (chat, offered) = ScriptedChat::new(replies);
        let executions = Arc::new(Mutex::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(CountingTool(executions.clone())));
        (
            ChatSession::new(Box::new(chat), tools, settings(), max_rounds),
            offered,
            executions,
        )
    }

    #[test]
    fn test_seeded_history() {
        let history = seeded_history();
        assert_eq!(history.len(), 3);
        let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert!(history.messages()[0]
            .content
            .as_deref()
            .unwrap()
            .contains("Your name is Archie"));
    }

    #[tokio::test]
    async fn test_exit_leaves_history_untouched() {
        let (mut session, offered, _) = new_session(vec![], 5);
        let mut input = ScriptedInput::lines(&["exit"]);
        let mut out = Vec::new();

        run_chat_loop(&mut session, &mut input, &mut out).await.unwrap();

        assert_eq!(session.history().len(), 3);
        assert!(offered.lock().unwrap().is_empty());
        assert!(String::from_utf8(out).unwrap().contains("Exiting chat..."));
    }

    #[tokio::test]
    async fn test_empty_line_and_interrupt_end_loop() {
        for outcome in [
            ReadOutcome::Line(String::new()),
            ReadOutcome::Interrupted,
            ReadOutcome::Eof,
        ] {
            let (mut session, _, _) = new_session(vec![], 5);
            let mut input = ScriptedInput(VecDeque::from(vec![outcome]));
            let mut out = Vec::new();
            run_chat_loop(&mut session, &mut input, &mut out).await.unwrap();
            assert_eq!(session.history().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_turn_appends_input_and_reply() {
        let (mut session, _, _) = new_session(vec![text("Here are some papers.")], 5);
        let mut input = ScriptedInput::lines(&["What is RAG?", "exit"]);
        let mut out = Vec::new();

        run_chat_loop(&mut session, &mut input, &mut out).await.unwrap();

        let messages = session.history().messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[3], ChatMessage::user("What is RAG?"));
        assert_eq!(messages[4], ChatMessage::assistant("Here are some papers."));

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Archie:>\n\nHere are some papers.\n"));
    }

    #[tokio::test]
    async fn test_only_literal_exit_ends_loop() {
        let (mut session, _, _) = new_session(vec![text("Still here.")], 5);
        let mut input = ScriptedInput::lines(&[" exit ", "exit"]);
        let mut out = Vec::new();

        run_chat_loop(&mut session, &mut input, &mut out).await.unwrap();

        let messages = session.history().messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[3], ChatMessage::user(" exit "));
        assert_eq!(messages[4], ChatMessage::assistant("Still here."));
    }

    #[tokio::test]
    async fn test_whitespace_only_line_ends_loop() {
        let (mut session, offered, _) = new_session(vec![], 5);
        let mut input = ScriptedInput::lines(&["   "]);
        let mut out = Vec::new();

        run_chat_loop(&mut session, &mut input, &mut out).await.unwrap();

        assert_eq!(session.history().len(), 3);
        assert!(offered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let (mut session, offered, executions) =
            new_session(vec![tool_reply("call_1"), text("Found it.")], 5);

        let answer = session.ask("find rag papers").await.unwrap();

        assert_eq!(answer, "Found it.");
        assert_eq!(*executions.lock().unwrap(), 1);
        assert_eq!(*offered.lock().unwrap(), vec![1, 1]);
        // tool traffic stays out of the persistent history
        assert_eq!(session.history().len(), 5);
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let replies = (0..10).map(|i| tool_reply(&format!("call_{}", i))).collect();
        let (mut session, offered, executions) = new_session(replies, 2);

        session.ask("loop forever").await.unwrap();

        assert_eq!(*executions.lock().unwrap(), 2);
        assert_eq!(*offered.lock().unwrap(), vec![1, 1, 0]);
    }

    #[test]
    fn test_wrap_short_text_unchanged() {
        assert_eq!(wrap_text("Hello there.", 90), "Hello there.");
        assert_eq!(wrap_text("", 90), "");
    }

    #[test]
    fn test_wrap_long_line() {
        let text = "word ".repeat(50);
        let wrapped = wrap_text(text.trim(), 90);
        assert!(wrapped.lines().count() > 1);
        assert!(wrapped.lines().all(|l| l.chars().count() <= 90));
        assert_eq!(wrapped.split_whitespace().count(), 50);
    }

    #[test]
    fn test_wrap_preserves_paragraphs_and_line_breaks() {
        let text = "First paragraph.\n\nSecond line one\nSecond line two";
        assert_eq!(wrap_text(text, 90), text);
    }

    #[test]
    fn test_wrap_splits_overlong_word() {
        assert_eq!(wrap_text("abcdefghij", 4), "abcd\nefgh\nij");
        assert_eq!(wrap_text("ab abcdefgh", 4), "ab\nabcd\nefgh");
    }

    #[test]
    fn test_wrap_keeps_list_indent() {
        assert_eq!(wrap_text("  - one two", 7), "  - one\ntwo");
    }
}
