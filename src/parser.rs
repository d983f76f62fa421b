//! Directive Parser
//!
//! Turns project source text into a stream of [`Directive`] values. Parsing
//! is single pass and line oriented: a [`LineCursor`] walks the file and
//! block directives consume their `{ "key": "value" }` bodies through the
//! same cursor. Whether an action runs now or is buffered into a function is
//! decided by the interpreter, not here.

use crate::error::{RuntimeError, RuntimeResult};
use std::collections::BTreeMap;
use tracing::debug;

/// `key: value` pairs of a block body, values already unquoted
pub type BlockConfig = BTreeMap<String, String>;

/// One parsed source statement
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `VB: KEY: "value"`, applied immediately even inside a function body
    SetVariable { key: String, value: String },
    /// `:start: NAME`
    BeginFunction(String),
    /// `:end:`
    EndFunction,
    /// `load: { … }`, resolved immediately
    Load(Vec<String>),
    /// Everything else: run now at top level, buffered inside a function
    Action(Action),
}

/// A deferred or immediate runtime action. Function bodies are stored as
/// sequences of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Log(String),
    CopyFile { from: String, to: String },
    MoveFile { from: String, to: String },
    DeleteFile(String),
    DeleteFolder(String),
    AddFolder(String),
    AddFile(String),
    EditFile { file: String, content: String },
    Run { command: String, wait: bool },
    /// `:start: "NAME"`
    Call(String),
    Schedule { seconds: u64, function: String },
    Connect { id: String, config: BlockConfig },
    Query { connection: String, config: BlockConfig },
    DeclareApi { name: String, config: BlockConfig },
    StartWeb { path: String, config: BlockConfig },
}

/// Cursor over the lines of one source file
pub struct LineCursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.split('\n').collect(),
            pos: 0,
        }
    }

    /// Take the next raw line
    pub fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    pub fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    /// 1-based number of the line most recently taken
    pub fn line_number(&self) -> usize {
        self.pos
    }
}

/// Parser over one file. Yields directives in source order; a malformed
/// directive yields an `Err` and parsing continues with the next line.
pub struct Parser<'a> {
    file: &'a str,
    cursor: LineCursor<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(file: &'a str, text: &'a str) -> Self {
        Self {
            file,
            cursor: LineCursor::new(text),
        }
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::parse(self.file, self.cursor.line_number(), message)
    }

    /// Parse the next directive, skipping blanks, comments and unknown lines
    pub fn next_directive(&mut self) -> Option<RuntimeResult<Directive>> {
        loop {
            let line = self.cursor.next_line()?.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(result) = self.parse_line(line) {
                return Some(result);
            }
            debug!("{}:{}: ignoring `{}`", self.file, self.cursor.line_number(), line);
        }
    }

    fn parse_line(&mut self, line: &str) -> Option<RuntimeResult<Directive>> {
        let result = if let Some(rest) = line.strip_prefix(":start:") {
            self.parse_start(rest.trim())
        } else if line.starts_with(":end:") {
            Ok(Directive::EndFunction)
        } else if let Some(rest) = line.strip_prefix("VB:") {
            self.parse_variable(rest)
        } else if line.starts_with("load:") {
            self.parse_load(line)
        } else if line.starts_with("copyFile") {
            self.parse_block(line).map(|mut c| {
                Directive::Action(Action::CopyFile {
                    from: take(&mut c, "from"),
                    to: take(&mut c, "to"),
                })
            })
        } else if line.starts_with("moveFile") {
            self.parse_block(line).map(|mut c| {
                Directive::Action(Action::MoveFile {
                    from: take(&mut c, "from"),
                    to: take(&mut c, "to"),
                })
            })
        } else if line.starts_with("editFile") {
            self.parse_block(line).map(|mut c| {
                Directive::Action(Action::EditFile {
                    file: take(&mut c, "file"),
                    content: take(&mut c, "content"),
                })
            })
        } else if let Some(rest) = line.strip_prefix("console.log:") {
            action(Action::Log(strip_outer_quotes(rest.trim()).to_string()))
        } else if let Some(rest) = line.strip_prefix("run:") {
            let command = strip_outer_quotes(rest.trim()).to_string();
            let mut wait = false;
            if let Some(next) = self.cursor.peek() {
                if next.contains("\"wait\"") {
                    wait = next.contains("\"true\"");
                    self.cursor.next_line();
                }
            }
            action(Action::Run { command, wait })
        } else if let Some(rest) = line.strip_prefix("deleteFile:") {
            action(Action::DeleteFile(unquote(rest)))
        } else if let Some(rest) = line.strip_prefix("deleteFolder:") {
            action(Action::DeleteFolder(unquote(rest)))
        } else if let Some(rest) = line.strip_prefix("addFolder:") {
            action(Action::AddFolder(unquote(rest)))
        } else if let Some(rest) = line.strip_prefix("addFile:") {
            action(Action::AddFile(unquote(rest)))
        } else if let Some(rest) = line.strip_prefix("schedule:") {
            self.parse_schedule(rest.trim())
        } else if line.starts_with("mysql:") {
            let id = block_title(line);
            self.parse_block(line)
                .map(|config| Directive::Action(Action::Connect { id, config }))
        } else if line.starts_with("query:") {
            let connection = block_title(line);
            self.parse_block(line)
                .map(|config| Directive::Action(Action::Query { connection, config }))
        } else if line.starts_with("webAPI:") {
            let name = block_title(line);
            self.parse_block(line)
                .map(|config| Directive::Action(Action::DeclareApi { name, config }))
        } else if line.starts_with("startWEB:") {
            let path = block_title(line);
            self.parse_block(line)
                .map(|config| Directive::Action(Action::StartWeb { path, config }))
        } else {
            return None;
        };

        Some(result)
    }

    fn parse_start(&self, rest: &str) -> RuntimeResult<Directive> {
        if let Some(quoted) = rest.strip_prefix('"') {
            let name = quoted
                .split('"')
                .next()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| self.error("empty function name in call"))?;
            return Ok(Directive::Action(Action::Call(name.to_string())));
        }

        let name = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| self.error("`:start:` needs a function name"))?;
        Ok(Directive::BeginFunction(name.to_string()))
    }

    fn parse_variable(&self, rest: &str) -> RuntimeResult<Directive> {
        let (key, value) = rest
            .trim()
            .split_once(':')
            .ok_or_else(|| self.error("expected `VB: KEY: \"value\"`"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(self.error("variable name is empty"));
        }
        Ok(Directive::SetVariable {
            key: key.to_string(),
            value: strip_outer_quotes(value.trim()).to_string(),
        })
    }

    fn parse_schedule(&self, rest: &str) -> RuntimeResult<Directive> {
        let (seconds, function) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| self.error("expected `schedule: SECONDS \"NAME\"`"))?;
        let seconds: u64 = seconds
            .parse()
            .map_err(|_| self.error(format!("invalid interval `{}`", seconds)))?;
        if seconds == 0 {
            return Err(self.error("schedule interval must be at least one second"));
        }
        let function = unquote(function);
        if function.is_empty() {
            return Err(self.error("schedule needs a function name"));
        }
        Ok(Directive::Action(Action::Schedule { seconds, function }))
    }

    fn parse_load(&mut self, line: &str) -> RuntimeResult<Directive> {
        let opens_inline = line["load:".len()..].trim() == "{";
        if !opens_inline {
            match self.cursor.peek() {
                Some(next) if next.trim() == "{" => {
                    self.cursor.next_line();
                }
                _ => return Err(self.error("'load:' must be followed by a block { ... }")),
            }
        }

        let mut modules = Vec::new();
        loop {
            let entry = self
                .cursor
                .next_line()
                .ok_or_else(|| self.error("unterminated `load:` block"))?
                .trim();
            if entry.starts_with('}') {
                break;
            }
            let name = entry.replace('"', "");
            let name = name.trim_end_matches(',').trim();
            if !name.is_empty() && !name.starts_with('#') {
                modules.push(name.to_string());
            }
        }
        Ok(Directive::Load(modules))
    }

    /// Consume a `{ "key": "value" … }` body up to the line starting with `}`
    fn parse_block(&mut self, header: &str) -> RuntimeResult<BlockConfig> {
        let mut config = BlockConfig::new();
        if let Some(inline) = header.split_once('{').map(|(_, rest)| rest) {
            if inline.trim_start().starts_with('}') {
                return Ok(config);
            }
        }
        loop {
            let line = self
                .cursor
                .next_line()
                .ok_or_else(|| self.error("block reached end of file before `}`"))?
                .trim();
            if line.starts_with('}') {
                return Ok(config);
            }
            if line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let key = key.replace(['"', ','], "");
                let key = key.trim();
                if !key.is_empty() {
                    config.insert(key.to_string(), parse_value(value));
                }
            }
        }
    }
}

fn action(action: Action) -> RuntimeResult<Directive> {
    Ok(Directive::Action(action))
}

fn take(config: &mut BlockConfig, key: &str) -> String {
    config.remove(key).unwrap_or_default()
}

/// Name given after a block keyword: `webAPI: "getNews"` → `getNews`
fn block_title(line: &str) -> String {
    let rest = line.split_once(':').map(|(_, r)| r).unwrap_or("");
    let rest = rest.split('{').next().unwrap_or("");
    rest.replace('"', "").trim().to_string()
}

fn strip_outer_quotes(text: &str) -> &str {
    let text = text.strip_prefix('"').unwrap_or(text);
    text.strip_suffix('"').unwrap_or(text)
}

fn unquote(text: &str) -> String {
    text.trim().replace('"', "")
}

/// Extract a block value: surrounding quotes, a trailing comma and a trailing
/// `#` comment are removed. Quotes inside a quoted value are kept.
pub fn parse_value(raw: &str) -> String {
    let raw = raw.trim();

    if let Some(body) = raw.strip_prefix('"') {
        let closing = body.match_indices('"').map(|(i, _)| i).find(|&i| {
            let tail = body[i + 1..].trim_start();
            let tail = tail.strip_prefix(',').unwrap_or(tail).trim_start();
            tail.is_empty() || tail.starts_with('#')
        });
        if let Some(end) = closing {
            return body[..end].to_string();
        }
        return strip_trailing(body).trim_end_matches('"').to_string();
    }

    strip_trailing(raw).to_string()
}

fn strip_trailing(text: &str) -> &str {
    let text = text.split('#').next().unwrap_or("");
    text.trim().trim_end_matches(',').trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(file: &str, text: &str) -> RuntimeResult<Vec<Directive>> {
        let mut parser = Parser::new(file, text);
        let mut directives = Vec::new();
        while let Some(directive) = parser.next_directive() {
            directives.push(directive?);
        }
        Ok(directives)
    }

    fn config(pairs: &[(&str, &str)]) -> BlockConfig {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_value_variants() {
        assert_eq!(parse_value(" \"index.html\","), "index.html");
        assert_eq!(parse_value("\"/news/$ID\" # Example of a dynamic path"), "/news/$ID");
        assert_eq!(parse_value("\"{ \"title\": \"$TITLE\" }\""), "{ \"title\": \"$TITLE\" }");
        assert_eq!(parse_value("8080, # port"), "8080");
        assert_eq!(parse_value("\"http://localhost:8080\""), "http://localhost:8080");
        assert_eq!(parse_value("\"unterminated"), "unterminated");
    }

    #[test]
    fn test_variables_and_comments() {
        let src = "# header\n\nVB: PORT: \"9090\"\nVB: URL: \"http://x:1\"\n  # indented";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::SetVariable {
                    key: "PORT".into(),
                    value: "9090".into()
                },
                Directive::SetVariable {
                    key: "URL".into(),
                    value: "http://x:1".into()
                },
            ]
        );
    }

    #[test]
    fn test_function_block_and_call() {
        let src = ":start: setup\nconsole.log: \"hi $NAME\"\n:end:\n:start: \"setup\"";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::BeginFunction("setup".into()),
                Directive::Action(Action::Log("hi $NAME".into())),
                Directive::EndFunction,
                Directive::Action(Action::Call("setup".into())),
            ]
        );
    }

    #[test]
    fn test_copy_file_block() {
        let src = "copyFile\n{\n  \"from\": \"index.html\",\n  \"to\": \"public/index.html\"\n}\nconsole.log: \"done\"";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(
            directives[0],
            Directive::Action(Action::CopyFile {
                from: "index.html".into(),
                to: "public/index.html".into()
            })
        );
        assert_eq!(directives[1], Directive::Action(Action::Log("done".into())));
    }

    #[test]
    fn test_web_api_and_start_web_blocks() {
        let src = r#"webAPI: "getSingleNews"
{
  "type": "get",
  "data": "news.json",
  "user": "false",
  "webserverid": "webserver1",
  "line": "/news/$ID" # Example of a dynamic path
}
startWEB: /public/
{
  "port": "$PORT",
  "id": "webserver1",
  "404": "404.html",
}"#;
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(
            directives[0],
            Directive::Action(Action::DeclareApi {
                name: "getSingleNews".into(),
                config: config(&[
                    ("type", "get"),
                    ("data", "news.json"),
                    ("user", "false"),
                    ("webserverid", "webserver1"),
                    ("line", "/news/$ID"),
                ]),
            })
        );
        assert_eq!(
            directives[1],
            Directive::Action(Action::StartWeb {
                path: "/public/".into(),
                config: config(&[("port", "$PORT"), ("id", "webserver1"), ("404", "404.html")]),
            })
        );
    }

    #[test]
    fn test_run_with_wait_line() {
        let src = "run: \"echo hi\"\n\"wait\": \"true\"\nrun: ls\nconsole.log: \"x\"";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::Action(Action::Run {
                    command: "echo hi".into(),
                    wait: true
                }),
                Directive::Action(Action::Run {
                    command: "ls".into(),
                    wait: false
                }),
                Directive::Action(Action::Log("x".into())),
            ]
        );
    }

    #[test]
    fn test_load_block() {
        let src = "load:\n{\n  Console\n  \"Database\",\n}\nVB: A: \"1\"";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(directives[0], Directive::Load(vec!["Console".into(), "Database".into()]));
        assert_eq!(directives.len(), 2);
    }

    #[test]
    fn test_load_without_block_is_error_but_parsing_continues() {
        let src = "load: Console\nVB: A: \"1\"";
        let mut parser = Parser::new("Main.tont", src);

        let err = parser.next_directive().unwrap().unwrap_err();
        assert!(err.to_string().contains("must be followed by a block"));
        assert_eq!(
            parser.next_directive().unwrap().unwrap(),
            Directive::SetVariable {
                key: "A".into(),
                value: "1".into()
            }
        );
    }

    #[test]
    fn test_unterminated_block_is_parse_error() {
        let src = "copyFile\n{\n  \"from\": \"a\"\n";
        let err = parse_all("Main.tont", src).unwrap_err();
        assert!(matches!(err, RuntimeError::Parse { .. }));
    }

    #[test]
    fn test_simple_file_primitives_and_schedule() {
        let src = "deleteFile: \"old.txt\"\naddFolder: \"logs\"\nschedule: 5 \"tick\"\nmoveFile\n{\n\"from\": \"a\",\n\"to\": \"b\"\n}";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::Action(Action::DeleteFile("old.txt".into())),
                Directive::Action(Action::AddFolder("logs".into())),
                Directive::Action(Action::Schedule {
                    seconds: 5,
                    function: "tick".into()
                }),
                Directive::Action(Action::MoveFile {
                    from: "a".into(),
                    to: "b".into()
                }),
            ]
        );
    }

    #[test]
    fn test_bad_schedule_interval() {
        assert!(parse_all("Main.tont", "schedule: soon \"tick\"").is_err());
        assert!(parse_all("Main.tont", "schedule: 0 \"tick\"").is_err());
    }

    #[test]
    fn test_metadata_and_unknown_lines_are_skipped() {
        let src = "dat: Main\ntype: Main\nsomething odd\nconsole.log: \"ok\"";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(directives, vec![Directive::Action(Action::Log("ok".into()))]);
    }

    #[test]
    fn test_connection_and_query_blocks() {
        let src = "mysql: \"setupDB\"\n{\n\"host\": \"localhost\",\n\"user\": \"root\"\n}\nquery: \"setupDB\" {\n\"sql\": \"SELECT 1\",\n\"into\": \"ROWS\"\n}";
        let directives = parse_all("Main.tont", src).unwrap();
        assert_eq!(
            directives[0],
            Directive::Action(Action::Connect {
                id: "setupDB".into(),
                config: config(&[("host", "localhost"), ("user", "root")]),
            })
        );
        assert_eq!(
            directives[1],
            Directive::Action(Action::Query {
                connection: "setupDB".into(),
                config: config(&[("sql", "SELECT 1"), ("into", "ROWS")]),
            })
        );
    }
}
