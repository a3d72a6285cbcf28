use crossterm::tty::IsTty;
use rustyline_async::{Readline, ReadlineError, SharedWriter};
use std::fmt::Display;
use std::io::{Stderr, Stdout, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

pub struct ShellRead {
    prompt: String,
    inner: ShellReadInner,
}

pub struct ShellWrite {
    inner: ShellWriteInner,
}

enum ShellReadInner {
    Interactive(Readline, SharedWriter),
    Stream(Lines<BufReader<Stdin>>),
}

enum ShellWriteInner {
    Interactive(SharedWriter),
    Stream(Stdout, Stderr),
}

/// Opens a line editor on a terminal, or plain line-by-line stdin when input is piped.
pub fn new_shell(prompt: String, disable_interactive: bool) -> (ShellRead, ShellWrite) {
    if !disable_interactive && std::io::stdout().is_tty() {
        match Readline::new(prompt.clone()) {
            Ok((read_line, writer)) => {
                return (
                    ShellRead {
                        prompt,
                        inner: ShellReadInner::Interactive(read_line, writer.clone()),
                    },
                    ShellWrite {
                        inner: ShellWriteInner::Interactive(writer),
                    },
                );
            }
            Err(err) => log::warn!("line editor unavailable, reading plain stdin: {}", err),
        }
    }

    (
        ShellRead {
            prompt,
            inner: ShellReadInner::Stream(BufReader::new(tokio::io::stdin()).lines()),
        },
        ShellWrite {
            inner: ShellWriteInner::Stream(std::io::stdout(), std::io::stderr()),
        },
    )
}

impl ShellRead {
    /// Reads the next line. `None` means input has ended.
    pub async fn read_line(&mut self) -> Option<String> {
        match &mut self.inner {
            ShellReadInner::Interactive(read, writer) => {
                let line = match read.readline().await {
                    Ok(line) => line,
                    Err(ReadlineError::IO(err)) => {
                        log::error!("failed to read input: {}", err);
                        return None;
                    }
                    Err(ReadlineError::Eof | ReadlineError::Closed) => return None,
                    Err(ReadlineError::Interrupted) => proc_exit::Code::SIGINT.process_exit(),
                };

                read.add_history_entry(line.clone());

                // echo back the line
                let _ = writeln!(writer, "{}{}", self.prompt, line);

                Some(line)
            }
            ShellReadInner::Stream(lines) => match lines.next_line().await {
                Ok(line) => line,
                Err(err) => {
                    log::error!("failed to read input: {}", err);
                    None
                }
            },
        }
    }
}

impl ShellWrite {
    pub fn line(&mut self, text: impl Display) {
        let _ = writeln!(self.out(), "{}", text);
    }

    pub fn error_line(&mut self, text: impl Display) {
        let _ = writeln!(self.err(), "{}", text);
    }

    fn out(&mut self) -> &mut dyn Write {
        match &mut self.inner {
            ShellWriteInner::Interactive(writer) => writer,
            ShellWriteInner::Stream(stdout, _) => stdout,
        }
    }

    fn err(&mut self) -> &mut dyn Write {
        match &mut self.inner {
            ShellWriteInner::Interactive(writer) => writer,
            ShellWriteInner::Stream(_, stderr) => stderr,
        }
    }
}
