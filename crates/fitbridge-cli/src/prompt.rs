use std::io::{BufRead, IsTerminal, Write};

use fitbridge_core::auth::{CredentialPrompt, Credentials, PromptError};

/// Asks on the terminal when no credentials were supplied up front.
pub struct CliPrompt {
    username: Option<String>,
    password: Option<String>,
}

impl CliPrompt {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }
}

impl CredentialPrompt for CliPrompt {
    fn credentials(&mut self) -> Result<Credentials, PromptError> {
        let stdin = std::io::stdin();
        let interactive = stdin.is_terminal();

        let username = match self.username.take() {
            Some(u) => u,
            None => ask(&mut stdin.lock(), "Username: ")?,
        };
        let password = match self.password.take() {
            Some(p) => p,
            None => ask_secret(&mut stdin.lock(), interactive, "Password: ")?,
        };

        if username.is_empty() || password.is_empty() {
            return Err(PromptError::Unavailable(
                "username and password must not be empty".to_string(),
            ));
        }
        Ok(Credentials::new(username, password))
    }
}

fn ask(input: &mut impl BufRead, label: &str) -> Result<String, PromptError> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{label}")?;
    stderr.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(PromptError::Unavailable(
            "stdin closed before credentials were entered".to_string(),
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read a secret without echo on a terminal. Piped input is read as a plain line.
fn ask_secret(
    input: &mut impl BufRead,
    interactive: bool,
    label: &str,
) -> Result<String, PromptError> {
    if interactive {
        return Ok(rpassword::prompt_password(label)?);
    }
    ask(input, label)
}
