//! `file_system` built-in tool (spec §4.5, §6): scoped, path-confined file
//! I/O. Every call names a `scope` of either `private` (the calling agent's
//! own sandbox) or `shared` (the session-wide workspace all agents in a
//! team can see), resolved by the caller to two distinct root directories
//! before path validation runs.

use chrono::{DateTime, Utc};
use sa_domain::message::ToolCall;
use serde::Serialize;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Private,
    Shared,
}

impl Scope {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "private" => Ok(Scope::Private),
            "shared" => Ok(Scope::Shared),
            other => Err(format!("unknown scope '{other}'; expected 'private' or 'shared'")),
        }
    }
}

/// The two roots a `file_system` call may be confined to. Constructed by
/// the orchestrator per-agent/per-session before dispatch.
#[derive(Debug, Clone)]
pub struct FileSystemRoots {
    pub private_root: PathBuf,
    pub shared_root: PathBuf,
}

impl FileSystemRoots {
    fn root_for(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Private => &self.private_root,
            Scope::Shared => &self.shared_root,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct DirEntry {
    name: String,
    size: u64,
    modified: String,
    is_dir: bool,
}

/// Reject `..` components and absolute input paths, then confine the
/// resolved path under `root` even when intermediate components don't yet
/// exist (so a `write` to a brand-new nested path is still checked).
pub fn validate_path(root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the scope root (got '{requested}')"
        ));
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    fs_create_dir_all_sync(root)?;
    let canonical_root = root
        .canonicalize()
        .map_err(|e| format!("cannot resolve scope root '{}': {e}", root.display()))?;

    let candidate = canonical_root.join(requested_path);
    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        tail.push(name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!(
            "path '{requested}' resolves outside its scope root"
        ));
    }
    Ok(resolved)
}

fn fs_create_dir_all_sync(root: &Path) -> Result<(), String> {
    std::fs::create_dir_all(root).map_err(|e| format!("cannot create scope root '{}': {e}", root.display()))
}

/// Dispatch one `file_system` call. Returns the JSON result that becomes the
/// tool message's structured content.
pub async fn execute(call: &ToolCall, roots: &FileSystemRoots) -> Result<Value, String> {
    let action = call.arg("action").ok_or("file_system call missing 'action'")?;
    let scope = Scope::parse(call.arg("scope").unwrap_or("private"))?;
    let root = roots.root_for(scope);

    match action {
        "read" => read(root, call).await,
        "write" => write(root, call).await,
        "append" => append(root, call).await,
        "delete" => delete(root, call).await,
        "list" => list(root, call).await,
        "find_replace" => find_replace(root, call).await,
        other => Err(format!("unknown file_system action '{other}'")),
    }
}

async fn read(root: &Path, call: &ToolCall) -> Result<Value, String> {
    let rel = call.arg("path").ok_or("file_system.read missing 'path'")?;
    let path = validate_path(root, rel)?;
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read '{rel}': {e}"))?;
    Ok(serde_json::json!({ "path": rel, "content": content }))
}

async fn write(root: &Path, call: &ToolCall) -> Result<Value, String> {
    let rel = call.arg("path").ok_or("file_system.write missing 'path'")?;
    let content = call.arg("content").unwrap_or("");
    let path = validate_path(root, rel)?;
    write_atomic(&path, content).await?;
    Ok(serde_json::json!({ "path": rel, "bytes_written": content.len() }))
}

async fn append(root: &Path, call: &ToolCall) -> Result<Value, String> {
    let rel = call.arg("path").ok_or("file_system.append missing 'path'")?;
    let content = call.arg("content").unwrap_or("");
    let path = validate_path(root, rel)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| format!("failed to open '{rel}' for append: {e}"))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| format!("failed to append to '{rel}': {e}"))?;
    file.flush().await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "path": rel, "bytes_appended": content.len() }))
}

async fn delete(root: &Path, call: &ToolCall) -> Result<Value, String> {
    let rel = call.arg("path").ok_or("file_system.delete missing 'path'")?;
    let path = validate_path(root, rel)?;
    let metadata = fs::metadata(&path)
        .await
        .map_err(|e| format!("failed to stat '{rel}': {e}"))?;
    if metadata.is_dir() {
        fs::remove_dir(&path)
            .await
            .map_err(|e| format!("failed to remove directory '{rel}' (must be empty): {e}"))?;
    } else {
        fs::remove_file(&path)
            .await
            .map_err(|e| format!("failed to remove file '{rel}': {e}"))?;
    }
    Ok(serde_json::json!({ "path": rel, "deleted": true }))
}

async fn list(root: &Path, call: &ToolCall) -> Result<Value, String> {
    let rel = call.arg("path").unwrap_or(".");
    let path = validate_path(root, rel)?;
    let mut read_dir = fs::read_dir(&path)
        .await
        .map_err(|e| format!("failed to read directory '{rel}': {e}"))?;

    let mut entries = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| format!("failed to read directory entry: {e}"))?
    {
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| format!("failed to stat '{}': {e}", entry.path().display()))?;
        let modified = metadata
            .modified()
            .ok()
            .map(|t| {
                let dt: DateTime<Utc> = t.into();
                dt.to_rfc3339()
            })
            .unwrap_or_default();
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            size: metadata.len(),
            modified,
            is_dir: metadata.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(serde_json::json!({ "path": rel, "entries": entries, "count": entries.len() }))
}

/// Replace occurrences of `find` with `replace` in `path`, stopping after
/// `count` replacements if given (spec testable scenario S5: "find_replace
/// with an explicit count replaces only the first N occurrences").
async fn find_replace(root: &Path, call: &ToolCall) -> Result<Value, String> {
    let rel = call.arg("path").ok_or("file_system.find_replace missing 'path'")?;
    let find = call.arg("find").ok_or("file_system.find_replace missing 'find'")?;
    let replace = call.arg("replace").unwrap_or("");
    let limit = call
        .arguments
        .get("count")
        .and_then(|v| v.as_i64())
        .map(|n| n.max(0) as usize);

    if find.is_empty() {
        return Err("file_system.find_replace 'find' must not be empty".to_string());
    }

    let path = validate_path(root, rel)?;
    let original = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read '{rel}': {e}"))?;

    let (updated, replacements) = replace_limited(&original, find, replace, limit);
    if replacements > 0 {
        write_atomic(&path, &updated).await?;
    }

    Ok(serde_json::json!({ "path": rel, "replacements": replacements }))
}

fn replace_limited(text: &str, find: &str, replace: &str, limit: Option<usize>) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut replacements = 0;
    let mut rest = text;
    loop {
        if limit.map(|n| replacements >= n).unwrap_or(false) {
            break;
        }
        match rest.find(find) {
            Some(idx) => {
                out.push_str(&rest[..idx]);
                out.push_str(replace);
                rest = &rest[idx + find.len()..];
                replacements += 1;
            }
            None => break,
        }
    }
    out.push_str(rest);
    (out, replacements)
}

async fn write_atomic(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }
    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| format!("failed to create temp file '{}': {e}", tmp_path.display()))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    file.flush().await.map_err(|e| format!("failed to flush temp file: {e}"))?;
    file.sync_data()
        .await
        .map_err(|e| format!("failed to sync temp file: {e}"))?;

    fs::rename(&tmp_path, path).await.map_err(|e| {
        let tmp = tmp_path.clone();
        tokio::spawn(async move {
            let _ = fs::remove_file(&tmp).await;
        });
        format!("failed to rename temp file into place: {e}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn call(action: &str, pairs: &[(&str, &str)]) -> ToolCall {
        let mut arguments = BTreeMap::new();
        arguments.insert("action".to_string(), sa_domain::message::ArgValue::String(action.into()));
        for (k, v) in pairs {
            arguments.insert(k.to_string(), sa_domain::message::ArgValue::String(v.to_string()));
        }
        ToolCall {
            call_id: "call_1".into(),
            tool_name: "file_system".into(),
            arguments,
        }
    }

    fn roots() -> (TempDir, TempDir, FileSystemRoots) {
        let private = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        let r = FileSystemRoots {
            private_root: private.path().to_path_buf(),
            shared_root: shared.path().to_path_buf(),
        };
        (private, shared, r)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_p, _s, roots) = roots();
        let c = call("write", &[("path", "note.txt"), ("content", "hello"), ("scope", "private")]);
        execute(&c, &roots).await.unwrap();

        let c = call("read", &[("path", "note.txt"), ("scope", "private")]);
        let result = execute(&c, &roots).await.unwrap();
        assert_eq!(result["content"], "hello");
    }

    #[tokio::test]
    async fn shared_and_private_scopes_are_isolated() {
        let (_p, _s, roots) = roots();
        let c = call("write", &[("path", "a.txt"), ("content", "private-data"), ("scope", "private")]);
        execute(&c, &roots).await.unwrap();

        let c = call("read", &[("path", "a.txt"), ("scope", "shared")]);
        assert!(execute(&c, &roots).await.is_err());
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let (_p, _s, roots) = roots();
        let c = call("read", &[("path", "../secret.txt"), ("scope", "private")]);
        assert!(execute(&c, &roots).await.is_err());
    }

    #[tokio::test]
    async fn find_replace_respects_count() {
        let (_p, _s, roots) = roots();
        let c = call("write", &[("path", "f.txt"), ("content", "aa aa aa"), ("scope", "shared")]);
        execute(&c, &roots).await.unwrap();

        let c = call(
            "find_replace",
            &[("path", "f.txt"), ("find", "aa"), ("replace", "bb"), ("scope", "shared"), ("count", "2")],
        );
        let result = execute(&c, &roots).await.unwrap();
        assert_eq!(result["replacements"], 2);

        let c = call("read", &[("path", "f.txt"), ("scope", "shared")]);
        let result = execute(&c, &roots).await.unwrap();
        assert_eq!(result["content"], "bb bb aa");
    }

    #[tokio::test]
    async fn find_replace_without_count_replaces_all() {
        let (_p, _s, roots) = roots();
        let c = call("write", &[("path", "f.txt"), ("content", "x-x-x"), ("scope", "shared")]);
        execute(&c, &roots).await.unwrap();

        let c = call("find_replace", &[("path", "f.txt"), ("find", "x"), ("replace", "y"), ("scope", "shared")]);
        let result = execute(&c, &roots).await.unwrap();
        assert_eq!(result["replacements"], 3);
    }

    #[tokio::test]
    async fn list_reports_entries_sorted() {
        let (_p, _s, roots) = roots();
        execute(&call("write", &[("path", "b.txt"), ("content", "b"), ("scope", "shared")]), &roots)
            .await
            .unwrap();
        execute(&call("write", &[("path", "a.txt"), ("content", "a"), ("scope", "shared")]), &roots)
            .await
            .unwrap();

        let result = execute(&call("list", &[("path", "."), ("scope", "shared")]), &roots)
            .await
            .unwrap();
        let entries = result["entries"].as_array().unwrap();
        assert_eq!(entries[0]["name"], "a.txt");
        assert_eq!(entries[1]["name"], "b.txt");
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (_p, _s, roots) = roots();
        execute(&call("write", &[("path", "doomed.txt"), ("content", "x"), ("scope", "private")]), &roots)
            .await
            .unwrap();
        execute(&call("delete", &[("path", "doomed.txt"), ("scope", "private")]), &roots)
            .await
            .unwrap();
        assert!(execute(&call("read", &[("path", "doomed.txt"), ("scope", "private")]), &roots)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let (_p, _s, roots) = roots();
        let c = call("teleport", &[("scope", "private")]);
        assert!(execute(&c, &roots).await.is_err());
    }
}
