use anyhow::{anyhow, Result};

const MIN_PASSWORD_LEN: usize = 12;

pub fn prompt_password_once(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var("BEQUEST_VAULT_PASSWORD") {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    if pw.len() < MIN_PASSWORD_LEN {
        return Err(anyhow!(
            "password too short; minimum {MIN_PASSWORD_LEN} characters"
        ));
    }
    Ok(pw)
}

pub fn prompt_password_twice(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var("BEQUEST_VAULT_PASSWORD") {
        if !pw.is_empty() {
            if pw.len() < MIN_PASSWORD_LEN {
                return Err(anyhow!(
                    "password too short; minimum {MIN_PASSWORD_LEN} characters"
                ));
            }
            if let Ok(confirm) = std::env::var("BEQUEST_VAULT_PASSWORD_CONFIRM") {
                if confirm != pw {
                    return Err(anyhow!("password confirmation mismatch"));
                }
            }
            return Ok(pw);
        }
    }
    let first = prompt_password_once(prompt)?;
    let second = rpassword::prompt_password("Confirm password: ")
        .map_err(|e| anyhow!("password prompt: {e}"))?;
    if first != second {
        return Err(anyhow!("passwords do not match"));
    }
    Ok(first)
}
