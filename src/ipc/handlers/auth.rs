use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = match required_str(req, "email") {
        Ok(v) => v.to_lowercase(),
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM accounts WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(&req.id, "email_taken", "account already exists", None);
    }

    let hash = match bcrypt::hash(&password, bcrypt::DEFAULT_COST) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "auth_failed", e.to_string(), None),
    };

    let account_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO accounts(id, email, password_hash, created_at) VALUES(?, ?, ?, ?)",
        (&account_id, &email, &hash, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "accounts" })),
        );
    }

    ok(&req.id, json!({ "accountId": account_id, "email": email }))
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = match required_str(req, "email") {
        Ok(v) => v.to_lowercase(),
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, password_hash FROM accounts WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Same response for unknown email and wrong password.
    let Some((account_id, hash)) = row else {
        return err(&req.id, "auth_failed", "invalid email or password", None);
    };
    match bcrypt::verify(&password, &hash) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "auth_failed", "invalid email or password", None),
        Err(e) => return err(&req.id, "auth_failed", e.to_string(), None),
    }

    let session = Session {
        token: Uuid::new_v4().to_string(),
        account_id,
        email,
        signed_in_at: chrono::Utc::now().to_rfc3339(),
    };
    tracing::info!(email = %session.email, "signed in");
    let body = json!({ "session": &session });
    state.session = Some(session);
    ok(&req.id, body)
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "session": &state.session }))
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(session) = state.session.take() {
        tracing::info!(email = %session.email, "signed out");
    }
    ok(&req.id, json!({ "session": serde_json::Value::Null }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        _ => None,
    }
}
