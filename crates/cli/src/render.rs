//! Terminal output for sessions and streamed replies.

use std::io::{self, Write};

use ideasketch::events::{Notice, NoticeLevel};
use ideasketch::pagination::Pagination;
use ideasketch::session::{Message, Role, Session};
use ideasketch::stream::THINKING_MARKER;

/// Prints an assistant reply incrementally as its content grows.
pub struct Renderer {
    printed: String,
    thinking_shown: bool,
    typing_indicator: bool,
}

impl Renderer {
    pub fn new(typing_indicator: bool) -> Self {
        Self {
            printed: String::new(),
            thinking_shown: false,
            typing_indicator,
        }
    }

    /// Print whatever the message gained since the last update.
    pub fn update(&mut self, message: &Message) -> io::Result<()> {
        let thinking = message.content.ends_with(THINKING_MARKER);
        let text = message.content.replace(THINKING_MARKER, "");
        let mut out = io::stdout();
        if let Some(delta) = text.strip_prefix(self.printed.as_str()) {
            write!(out, "{}", delta)?;
        } else {
            // Replaced rather than extended (for example by an error reply).
            write!(out, "\n{}", text)?;
        }
        self.printed = text;
        if thinking && self.typing_indicator && !self.thinking_shown {
            self.thinking_shown = true;
            write!(out, " [thinking...]")?;
        }
        out.flush()
    }

    /// Print the final state of the reply and its tool summary.
    pub fn finish(&mut self, message: &Message) -> io::Result<()> {
        self.update(message)?;
        println!();
        print_tools(message);
        Ok(())
    }
}

pub fn print_notice(notice: &Notice) {
    match notice.level {
        NoticeLevel::Success => eprintln!("ok: {}", notice.text),
        NoticeLevel::Error => eprintln!("error: {}", notice.text),
    }
}

fn print_tools(message: &Message) {
    for tool in message.tools() {
        println!("  [{}] {}", tool.display_name(), tool.display_input());
        let output = tool.tool_output.trim();
        if !output.is_empty() {
            for line in output.lines() {
                println!("    {}", line);
            }
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

pub fn print_session_line(session: &Session, current: bool) {
    let marker = if current { "*" } else { " " };
    println!(
        "{} {}  {}  ({} messages, {})",
        marker,
        session.id,
        session.title,
        session.messages.len(),
        session.timestamp.format("%Y-%m-%d %H:%M")
    );
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}",
        role_label(message.role),
        message.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    let content = if message.is_loading && message.content.is_empty() {
        "..."
    } else {
        message.content.as_str()
    };
    println!("{}", content);
    print_tools(message);
    println!();
}

/// Print one page of a session, newest message first.
pub fn print_session_page(session: &Session, page: usize, per_page: usize) {
    let pagination = Pagination::new(session.messages.len(), per_page);
    println!("{} ({})", session.title, session.id);
    if session.messages.is_empty() {
        println!("(no messages)");
        return;
    }
    let Some(messages) = pagination.page(&session.messages, page) else {
        println!("page {} is out of range (1-{})", page, pagination.total_pages());
        return;
    };
    println!();
    for message in messages {
        print_message(message);
    }
    if pagination.is_needed() {
        let pages: Vec<String> = pagination
            .page_numbers(page)
            .into_iter()
            .map(|n| if n == page { format!("[{}]", n) } else { n.to_string() })
            .collect();
        println!("page {} of {}: {}", page, pagination.total_pages(), pages.join(" "));
    }
}
