use linefeed::complete::{Completer, Completion};
use linefeed::terminal::Terminal;
use linefeed::Prompter;

use super::APP_COMMANDS;

/// Completes shell commands, then member names of the connected device.
pub struct MainCompleter {
    pub members: Vec<String>,
}

impl<Term: Terminal> Completer<Term> for MainCompleter {
    fn complete(
        &self,
        word: &str,
        prompter: &Prompter<Term>,
        start: usize,
        _end: usize,
    ) -> Option<Vec<Completion>> {
        let line = prompter.buffer();
        let mut words = line[..start].split_whitespace();

        match words.next() {
            // Complete command name
            None => {
                let mut compls = Vec::new();
                for &(cmd, _) in APP_COMMANDS {
                    if cmd.starts_with(word) {
                        compls.push(Completion::simple(cmd.to_owned()));
                    }
                }
                // bare member names read the attribute
                compls.extend(complete_member(word, &self.members));
                Some(compls)
            }
            // Complete member names for commands taking one
            Some("get") | Some("set") | Some("call") | Some("callable") => {
                if words.count() == 0 {
                    Some(complete_member(word, &self.members))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn complete_member(word: &str, members: &[String]) -> Vec<Completion> {
    members
        .iter()
        .filter(|name| name.starts_with(word))
        .map(|name| Completion::simple(name.clone()))
        .collect()
}
