use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::warn;

use unipass_core::auth::{FileStore, TOKEN_KEY};
use unipass_core::{
    AuthError, Config, CredentialBackend, SessionManager, SessionState, Settings, SignOutOutcome,
};

/// Password is read from here before prompting
const ENV_PASSWORD: &str = "UNIPASS_PASSWORD";

/// Print the tagged failure object UI code branches on
fn report_failure(err: &AuthError) -> Result<ExitCode> {
    println!("{}", serde_json::to_string(&err.to_failure())?);
    eprintln!("Sign-in failed: {}", err);
    Ok(ExitCode::FAILURE)
}

pub async fn login(
    manager: &SessionManager,
    settings: &mut Settings,
    reg_no: Option<String>,
    push_token: Option<&str>,
) -> Result<ExitCode> {
    let reg_no = match reg_no.or_else(|| settings.last_identifier.clone()) {
        Some(reg_no) => reg_no,
        None => prompt_reg_no()?,
    };
    if reg_no.is_empty() {
        eprintln!("Registration number required");
        return Ok(ExitCode::FAILURE);
    }

    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    match manager.sign_in_with_credentials(&reg_no, &password, push_token).await {
        Ok(_) => {
            settings.last_identifier = Some(reg_no.clone());
            if let Err(e) = settings.save() {
                warn!(error = %e, "Failed to save settings");
            }
            println!("Signed in as {}", reg_no);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => report_failure(&e),
    }
}

pub async fn login_qr(
    manager: &SessionManager,
    code: &str,
    push_token: Option<&str>,
) -> Result<ExitCode> {
    match manager.sign_in_with_scanned_code(code, push_token).await {
        Ok(_) => {
            println!("Signed in with QR code");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => report_failure(&e),
    }
}

pub async fn logout(manager: &SessionManager) -> ExitCode {
    match manager.sign_out().await {
        SignOutOutcome::Cleared => println!("Signed out"),
        SignOutOutcome::TokenMayRemain(e) => {
            println!("Signed out");
            eprintln!("Warning: stored token could not be deleted: {}", e);
        }
    }
    ExitCode::SUCCESS
}

pub async fn status(manager: &SessionManager, config: &Config, json: bool) -> Result<ExitCode> {
    let session = manager.session();
    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("API:         {}", config.api_url);
    if config.credential_backend == CredentialBackend::File {
        let store = FileStore::new(config.credentials_path.clone(), None);
        println!("Storage:     file ({})", store.path().display());
        match store.updated_at(TOKEN_KEY).await {
            Ok(Some(at)) => println!("Stored at:   {}", at.to_rfc3339()),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not read credential file"),
        }
    } else {
        println!("Storage:     {}", config.credential_backend);
    }
    println!("Session:     {}", session.state());
    if let SessionState::Authenticated(_) = session.state() {
        println!("Auth header: Bearer <redacted>");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn get(manager: &SessionManager, path: &str) -> Result<ExitCode> {
    if !manager.is_authenticated() {
        eprintln!("Not signed in - run `unipass login` first");
        return Ok(ExitCode::FAILURE);
    }

    let value: serde_json::Value = match manager.client().get_json(path).await {
        Ok(value) => value,
        Err(e) if e.requires_sign_in() => {
            eprintln!("{} - run `unipass login` again", e);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).with_context(|| format!("GET {} failed", path)),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(ExitCode::SUCCESS)
}

fn prompt_reg_no() -> Result<String> {
    print!("Registration number: ");
    io::stdout().flush()?;

    let mut reg_no = String::new();
    io::stdin().read_line(&mut reg_no)?;
    Ok(reg_no.trim().to_string())
}
