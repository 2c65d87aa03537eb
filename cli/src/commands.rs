//! Meta-commands understood by the interactive driver.
//!
//! Anything that is not `exit`, `read <file>` or `run <command>` is passed to
//! TQL untouched.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    /// Blank input, nothing to do
    Empty,
    Exit,
    /// Replay every line of a file as a command
    Read(PathBuf),
    /// `read` without a file name
    ReadMissingFile,
    /// Run an OS command with inherited stdio
    Run(Vec<String>),
    /// Pass through to TQL
    Tql(String),
}

impl MetaCommand {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return MetaCommand::Empty;
        }

        let lower = trimmed.to_lowercase();
        if lower == "exit" {
            return MetaCommand::Exit;
        }

        let mut tokens = trimmed.split_whitespace();
        let first = tokens.next().unwrap_or_default().to_lowercase();
        match first.as_str() {
            "read" => match tokens.next() {
                Some(file) => MetaCommand::Read(PathBuf::from(file.trim_matches(';'))),
                None => MetaCommand::ReadMissingFile,
            },
            "run" => {
                let words: Vec<String> = trimmed
                    .trim_end_matches(';')
                    .split_whitespace()
                    .skip(1)
                    .map(str::to_string)
                    .collect();
                MetaCommand::Run(words)
            }
            _ => MetaCommand::Tql(input.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_is_case_insensitive() {
        assert_eq!(MetaCommand::parse("EXIT"), MetaCommand::Exit);
        assert_eq!(MetaCommand::parse("  exit \n"), MetaCommand::Exit);
    }

    #[test]
    fn test_read_strips_semicolon() {
        assert_eq!(
            MetaCommand::parse("read setup.tql;"),
            MetaCommand::Read(PathBuf::from("setup.tql"))
        );
        assert_eq!(MetaCommand::parse("read"), MetaCommand::ReadMissingFile);
    }

    #[test]
    fn test_run_collects_arguments() {
        assert_eq!(
            MetaCommand::parse("run ls -l /tmp;"),
            MetaCommand::Run(vec!["ls".to_string(), "-l".to_string(), "/tmp".to_string()])
        );
        assert_eq!(MetaCommand::parse("run"), MetaCommand::Run(vec![]));
    }

    #[test]
    fn test_words_starting_with_run_pass_through() {
        assert_eq!(
            MetaCommand::parse("runtime_stats;"),
            MetaCommand::Tql("runtime_stats;".to_string())
        );
    }

    #[test]
    fn test_statements_pass_through() {
        assert_eq!(
            MetaCommand::parse("select * from foo;\n"),
            MetaCommand::Tql("select * from foo;".to_string())
        );
        assert_eq!(MetaCommand::parse("   "), MetaCommand::Empty);
    }
}
