// Runtime error reporting
//
// The error value itself is deliberately tiny; the formatted message lives
// on the VM. There is no unwinding inside the interpreter: an error is
// raised at its point of detection, attributed to a source line through the
// instruction table, and either handed to the host's error handler (which
// is expected to unwind cooperatively via the returned Result) or printed
// as a fatal diagnostic.

use colored::Colorize;

use crate::vm::debug_info::{self, GLOBAL_SCOPE};
use crate::vm::Vm;

/// Host callback for runtime errors: `(message, line, column)`.
pub type ErrorHandler = Box<dyn FnMut(&str, i32, i32)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Runtime fault; the message is stored in [`Vm::error_message`].
    Runtime,
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::Runtime => write!(f, "Runtime Error"),
        }
    }
}

impl std::error::Error for VmError {}

pub type VmResult<T> = Result<T, VmError>;

impl Vm {
    /// Raise a runtime error at the current pc.
    ///
    /// With a handler installed this invokes it and returns the error for
    /// `?`-propagation out of the dispatch loop. Without one it prints a
    /// colored diagnostic and terminates the process.
    pub fn error(&mut self, message: impl Into<String>) -> VmError {
        let message = message.into();

        let fun_name = match self.frames.last().and_then(|frame| frame.function) {
            Some(function) => function.function_ref().name.clone(),
            None => GLOBAL_SCOPE.into(),
        };

        let code = self.code.code_ref();
        let record = debug_info::locate(&code.instrs, &fun_name, self.pc).cloned();

        if self.error_handler.is_some() {
            let full = match record.as_ref().and_then(|r| r.fun_name.as_ref()) {
                Some(name) => format!("{message} (in function '{name}')"),
                None => message,
            };
            let line = record.as_ref().map(|r| r.line).unwrap_or(-1);
            if let Some(handler) = self.error_handler.as_mut() {
                handler(&full, line, 0);
            }
            self.error_message = full;
            return VmError::Runtime;
        }

        match record {
            Some(record) => {
                let mut location = format!("[RUNTIME ERROR] at line {}", record.line);
                if let Some(name) = &record.fun_name {
                    location.push_str(&format!(" in function '{name}'"));
                }
                location.push(':');
                eprintln!("\n{} {message}\n", location.bright_red().bold());
            }
            None => {
                eprintln!(
                    "\n{} {message}\n",
                    "[RUNTIME ERROR] at unknown location:".bright_red().bold()
                );
            }
        }
        std::process::exit(1);
    }

    /// Message of the last error raised through a handler.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}
