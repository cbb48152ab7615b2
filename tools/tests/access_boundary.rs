//! End-to-end tests of the access boundary through `ToolDispatcher`.
//!
//! Every call goes through the public envelope surface, the same way an
//! agent integration would use it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use warden_tools::ToolDispatcher;
use warden_types::{AccessPolicy, AccessPolicyBuilder, ErrorKind, ToolResult};

struct Fixture {
    _dir: TempDir,
    base: PathBuf,
    repo: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(dir.path()).unwrap();
        let repo = base.join("repo");
        fs::create_dir(&repo).unwrap();
        fs::write(repo.join("main.py"), "def main():\n    return 42\n").unwrap();
        fs::write(repo.join("secret.env"), "API_KEY=abc\n").unwrap();
        fs::write(repo.join("binary.exe"), b"MZ\0\0").unwrap();
        Self {
            _dir: dir,
            base,
            repo,
        }
    }

    fn policy(&self) -> AccessPolicyBuilder {
        AccessPolicy::builder().allow_directory(&self.repo)
    }

    fn path(&self, rel: &str) -> String {
        self.repo.join(rel).to_string_lossy().into_owned()
    }
}

fn dispatcher(builder: AccessPolicyBuilder) -> ToolDispatcher {
    ToolDispatcher::new(builder.build().unwrap())
}

fn kind(result: &ToolResult) -> Option<ErrorKind> {
    result.error_kind
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn python_repo_scenario() {
    let fx = Fixture::new();
    let d = dispatcher(fx.policy().allowed_extensions([".py"]));

    let ok = d.invoke("read_file", &json!({"path": fx.path("main.py")})).await;
    assert!(ok.success, "{ok:?}");
    assert_eq!(ok.get("content"), Some(&json!("def main():\n    return 42\n")));
    assert_eq!(ok.get("size"), Some(&json!(26)));
    assert_eq!(ok.get("path"), Some(&json!(fx.path("main.py"))));

    let env = d.invoke("read_file", &json!({"path": fx.path("secret.env")})).await;
    assert!(!env.success);
    assert_eq!(kind(&env), Some(ErrorKind::BlockedPattern));

    let exe = d.invoke("read_file", &json!({"path": fx.path("binary.exe")})).await;
    assert_eq!(kind(&exe), Some(ErrorKind::ExtensionNotAllowed));

    let passwd = d.invoke("read_file", &json!({"path": "/etc/passwd"})).await;
    assert_eq!(kind(&passwd), Some(ErrorKind::AccessDenied));
    assert!(!passwd.error.unwrap_or_default().contains("/etc"));
}

#[tokio::test]
async fn failure_envelope_shape() {
    let fx = Fixture::new();
    let d = dispatcher(fx.policy());
    let result = d.invoke("read_file", &json!({"path": "../outside.txt"})).await;
    let value = result.to_value();
    let object = value.as_object().unwrap();
    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["error", "error_kind", "success"]);
    assert_eq!(value["error_kind"], json!("AccessDenied"));
}

#[tokio::test]
async fn dot_dot_that_lands_outside_is_denied() {
    let fx = Fixture::new();
    fs::write(fx.base.join("outside.txt"), "nope").unwrap();
    fs::create_dir(fx.repo.join("sub")).unwrap();
    let d = dispatcher(fx.policy());

    for input in [
        "../outside.txt".to_string(),
        format!("{}/../outside.txt", display(&fx.repo)),
        format!("{}/./sub/../../outside.txt", display(&fx.repo)),
    ] {
        let result = d.invoke("read_file", &json!({"path": input})).await;
        assert_eq!(kind(&result), Some(ErrorKind::AccessDenied), "{input}");
    }

    // `..` that stays inside is fine.
    let inside = format!("{}/sub/../main.py", display(&fx.repo));
    assert!(d.invoke("read_file", &json!({"path": inside})).await.success);

    // `..` below a directory that does not exist cannot be resolved.
    let dangling = format!("{}/nowhere/../main.py", display(&fx.repo));
    let result = d.invoke("read_file", &json!({"path": dangling})).await;
    assert_eq!(kind(&result), Some(ErrorKind::InvalidPath));

    // A symlinked directory is followed before `..` applies, so
    // `repo/link/../main.py` names `outside/main.py`, not `repo/main.py`.
    #[cfg(unix)]
    {
        fs::create_dir_all(fx.base.join("outside/deep")).unwrap();
        fs::write(fx.base.join("outside/main.py"), "OUTSIDE").unwrap();
        std::os::unix::fs::symlink(fx.base.join("outside/deep"), fx.repo.join("link")).unwrap();

        for follow in [false, true] {
            let d = dispatcher(fx.policy().follow_symlinks(follow));
            let through_link = format!("{}/link/../main.py", display(&fx.repo));

            let read = d.invoke("read_file", &json!({"path": through_link})).await;
            assert!(!read.success, "follow={follow}: {read:?}");
            assert_eq!(kind(&read), Some(ErrorKind::SymlinkEscape));
            assert!(read.get("content").is_none());

            let check = d
                .invoke("check_file_access", &json!({"path": through_link}))
                .await;
            assert_eq!(check.get("can_access"), Some(&json!(false)));
            assert_eq!(check.get("path"), Some(&Value::Null));
        }
    }
}

#[tokio::test]
async fn shared_prefix_sibling_is_not_whitelisted() {
    let fx = Fixture::new();
    let evil = fx.base.join("repo-evil");
    fs::create_dir(&evil).unwrap();
    fs::write(evil.join("loot.py"), "x").unwrap();
    let d = dispatcher(fx.policy());

    let result = d
        .invoke("read_file", &json!({"path": display(&evil.join("loot.py"))}))
        .await;
    assert_eq!(kind(&result), Some(ErrorKind::AccessDenied));

    let listing = d
        .invoke("list_files", &json!({"directory": display(&evil)}))
        .await;
    assert_eq!(kind(&listing), Some(ErrorKind::AccessDenied));
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_escape_denied_in_both_modes() {
    use std::os::unix::fs::symlink;

    let fx = Fixture::new();
    fs::write(fx.base.join("shadow"), "root:x:0:0").unwrap();
    fs::create_dir(fx.base.join("outside_dir")).unwrap();
    fs::write(fx.base.join("outside_dir/data.py"), "leak = 1\n").unwrap();
    symlink(fx.base.join("shadow"), fx.repo.join("shadow.py")).unwrap();
    symlink(fx.base.join("outside_dir"), fx.repo.join("linked")).unwrap();

    for follow in [false, true] {
        let d = dispatcher(fx.policy().follow_symlinks(follow));
        let result = d.invoke("read_file", &json!({"path": "shadow.py"})).await;
        assert_eq!(kind(&result), Some(ErrorKind::SymlinkEscape), "follow={follow}");

        let through_dir = d.invoke("read_file", &json!({"path": "linked/data.py"})).await;
        assert_eq!(kind(&through_dir), Some(ErrorKind::SymlinkEscape), "follow={follow}");

        // Traversals skip the link instead of failing or following it.
        let grep = d
            .invoke(
                "search_code",
                &json!({"pattern": "leak|root", "directory": display(&fx.repo)}),
            )
            .await;
        assert!(grep.success);
        assert_eq!(grep.get("count"), Some(&json!(0)), "follow={follow}");

        let listing = d
            .invoke(
                "list_files",
                &json!({"directory": display(&fx.repo), "recursive": true}),
            )
            .await;
        let files = listing.get("files").unwrap().as_array().unwrap();
        assert!(
            files
                .iter()
                .all(|f| f.as_str().unwrap().starts_with(&display(&fx.repo))),
            "follow={follow}"
        );
        assert!(!files.iter().any(|f| f.as_str().unwrap().contains("shadow")));
    }
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_inside_whitelist_follows_only_when_enabled() {
    let fx = Fixture::new();
    std::os::unix::fs::symlink(fx.repo.join("main.py"), fx.repo.join("alias.py")).unwrap();

    let strict = dispatcher(fx.policy());
    let result = strict.invoke("read_file", &json!({"path": "alias.py"})).await;
    assert_eq!(kind(&result), Some(ErrorKind::SymlinkEscape));

    let follow = dispatcher(fx.policy().follow_symlinks(true));
    let result = follow.invoke("read_file", &json!({"path": "alias.py"})).await;
    assert!(result.success);
    assert_eq!(result.get("path"), Some(&json!(fx.path("main.py"))));
}

#[tokio::test]
async fn denied_patterns_apply_inside_whitelist() {
    let fx = Fixture::new();
    fs::write(fx.repo.join(".env"), "A=1").unwrap();
    fs::create_dir(fx.repo.join(".ssh")).unwrap();
    fs::write(fx.repo.join(".ssh/config.py"), "x").unwrap();
    fs::write(fx.repo.join("Access_TOKEN.py"), "x").unwrap();
    let d = dispatcher(fx.policy());

    for rel in [".env", ".ssh/config.py", "Access_TOKEN.py"] {
        let result = d.invoke("read_file", &json!({"path": rel})).await;
        assert_eq!(kind(&result), Some(ErrorKind::BlockedPattern), "{rel}");
    }

    let found = d
        .invoke("find_files", &json!({"directory": display(&fx.repo)}))
        .await;
    let files: Vec<String> = serde_json::from_value(found.get("files").unwrap().clone()).unwrap();
    assert_eq!(files, vec![fx.path("binary.exe"), fx.path("main.py")]);
}

#[tokio::test]
async fn size_boundary_is_inclusive() {
    let fx = Fixture::new();
    fs::write(fx.repo.join("exact.txt"), "x".repeat(64)).unwrap();
    fs::write(fx.repo.join("over.txt"), "x".repeat(65)).unwrap();
    let d = dispatcher(fx.policy().max_file_size_bytes(64));

    let exact = d.invoke("read_file", &json!({"path": "exact.txt"})).await;
    assert!(exact.success);
    assert_eq!(exact.get("size"), Some(&json!(64)));

    let over = d.invoke("read_file", &json!({"path": "over.txt"})).await;
    assert_eq!(kind(&over), Some(ErrorKind::FileTooLarge));
}

#[tokio::test]
async fn search_truncates_at_cap() {
    let fx = Fixture::new();
    let n = 10;
    let body: String = (0..n + 5).map(|i| format!("needle {i}\n")).collect();
    fs::write(fx.repo.join("haystack.txt"), body).unwrap();
    let d = dispatcher(fx.policy().max_search_results(n));

    let result = d
        .invoke(
            "search_code",
            &json!({"pattern": "needle", "directory": display(&fx.repo)}),
        )
        .await;
    assert!(result.success);
    assert_eq!(result.get("count"), Some(&json!(n)));
    assert_eq!(result.get("matches").unwrap().as_array().unwrap().len(), n);
    assert_eq!(result.get("truncated"), Some(&json!(true)));
    assert_eq!(result.get("timed_out"), Some(&json!(false)));

    let first = &result.get("matches").unwrap()[0];
    assert_eq!(first["line"], json!(1));
    assert_eq!(first["content"], json!("needle 0"));
    assert_eq!(first["file"], json!(fx.path("haystack.txt")));
}

#[tokio::test]
async fn expired_search_returns_partial_timed_out() {
    let fx = Fixture::new();
    let d = dispatcher(fx.policy().search_timeout(Duration::from_nanos(1)));

    let result = d
        .invoke(
            "search_code",
            &json!({"pattern": "def", "directory": display(&fx.repo)}),
        )
        .await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.get("timed_out"), Some(&json!(true)));
    assert!(result.get("matches").unwrap().is_array());

    let found = d
        .invoke("find_files", &json!({"directory": display(&fx.repo)}))
        .await;
    assert_eq!(found.get("timed_out"), Some(&json!(true)));
}

#[tokio::test]
async fn check_file_access_agrees_with_read_file() {
    let fx = Fixture::new();
    fs::create_dir(fx.repo.join("pkg")).unwrap();
    fs::write(fx.repo.join("big.py"), "x".repeat(200)).unwrap();
    let d = dispatcher(fx.policy().allowed_extensions(["py"]).max_file_size_bytes(100));

    for input in [
        "main.py",
        "secret.env",
        "binary.exe",
        "big.py",
        "missing.py",
        "pkg",
        "/etc/passwd",
        "../repo/main.py",
        "",
    ] {
        let check = d.invoke("check_file_access", &json!({"path": input})).await;
        assert!(check.success, "{input}");
        let read = d.invoke("read_file", &json!({"path": input})).await;
        assert_eq!(check.get("can_access"), Some(&json!(read.success)), "{input}");
        if let Some(error) = read.error {
            assert_eq!(check.get("reason"), Some(&json!(error)), "{input}");
        }
    }

    let outside = d
        .invoke("check_file_access", &json!({"path": "/etc/passwd"}))
        .await;
    assert_eq!(outside.get("path"), Some(&Value::Null));
    let inside = d
        .invoke("check_file_access", &json!({"path": "main.py"}))
        .await;
    assert_eq!(inside.get("path"), Some(&json!(fx.path("main.py"))));
    assert_eq!(inside.get("reason"), Some(&json!("Access allowed")));
}

#[tokio::test]
async fn unknown_operations_and_bad_arguments_touch_nothing() {
    let fx = Fixture::new();
    let d = dispatcher(fx.policy());

    let unknown = d.invoke("execute_command", &json!({"cmd": "ls"})).await;
    assert_eq!(kind(&unknown), Some(ErrorKind::UnknownOperation));

    let missing = d.invoke("read_file", &json!({})).await;
    assert_eq!(kind(&missing), Some(ErrorKind::InvalidArguments));
    assert!(missing.error.unwrap().contains("'path'"));

    let wrong_type = d
        .invoke(
            "list_files",
            &json!({"directory": display(&fx.repo), "recursive": "sometimes"}),
        )
        .await;
    assert_eq!(kind(&wrong_type), Some(ErrorKind::InvalidArguments));
    assert!(wrong_type.error.unwrap().contains("'recursive'"));

    let bad_regex = d
        .invoke(
            "search_code",
            &json!({"pattern": "([", "directory": "/definitely/not/here"}),
        )
        .await;
    assert_eq!(kind(&bad_regex), Some(ErrorKind::InvalidArguments));
}

#[tokio::test]
async fn write_operations_are_gated() {
    let fx = Fixture::new();
    let closed = dispatcher(fx.policy());
    let names: Vec<String> = closed
        .describe_operations()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert!(!names.iter().any(|n| n.contains("write") || n.contains("delete")));
    let result = closed
        .invoke("write_file", &json!({"path": "x.txt", "content": "x"}))
        .await;
    assert_eq!(kind(&result), Some(ErrorKind::UnknownOperation));
    assert!(!fx.repo.join("x.txt").exists());

    let open = dispatcher(fx.policy().allow_write(true));
    let names: Vec<String> = open
        .describe_operations()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert!(names.contains(&"write_file".to_string()));
    assert!(!names.contains(&"delete_file".to_string()));

    let written = open
        .invoke(
            "write_file",
            &json!({"path": "notes/todo.txt", "content": "ship it"}),
        )
        .await;
    assert!(written.success, "{written:?}");
    assert_eq!(written.get("size"), Some(&json!(7)));
    let read = open
        .invoke("read_file", &json!({"path": "notes/todo.txt"}))
        .await;
    assert_eq!(read.get("content"), Some(&json!("ship it")));

    let blocked = open
        .invoke("write_file", &json!({"path": ".env", "content": "A=1"}))
        .await;
    assert_eq!(kind(&blocked), Some(ErrorKind::BlockedPattern));
}

#[tokio::test]
async fn narrowed_policy_cannot_widen() {
    let fx = Fixture::new();
    let student = fx.repo.join("student");
    fs::create_dir(&student).unwrap();
    fs::write(student.join("solution.py"), "x = 1\n").unwrap();
    fs::write(student.join("answer.py"), "y = 2\n").unwrap();

    let outer = fx.policy().build().unwrap();
    let inner = outer
        .narrowed([student.clone()], ["solution"])
        .unwrap();
    let d = ToolDispatcher::new(inner);

    assert!(d.invoke("read_file", &json!({"path": "answer.py"})).await.success);
    let blocked = d.invoke("read_file", &json!({"path": "solution.py"})).await;
    assert_eq!(kind(&blocked), Some(ErrorKind::BlockedPattern));
    let sibling = d
        .invoke("read_file", &json!({"path": fx.path("main.py")}))
        .await;
    assert_eq!(kind(&sibling), Some(ErrorKind::AccessDenied));

    assert!(outer.narrowed([fx.base.clone()], Vec::<String>::new()).is_err());
}

#[tokio::test]
async fn disabled_policy_answers_with_envelopes() {
    let fx = Fixture::new();
    let d = dispatcher(fx.policy().enabled(false));
    let result = d.invoke("read_file", &json!({"path": "main.py"})).await;
    assert_eq!(kind(&result), Some(ErrorKind::AccessDenied));
    assert_eq!(result.error.as_deref(), Some("Filesystem access is disabled"));
}

#[tokio::test]
async fn cancelled_before_start_times_out() {
    let fx = Fixture::new();
    let d = dispatcher(fx.policy());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = d
        .invoke_with_cancel(
            "find_files",
            &json!({"directory": display(&fx.repo)}),
            cancel,
        )
        .await;
    assert_eq!(kind(&result), Some(ErrorKind::Timeout));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_policy() {
    let fx = Fixture::new();
    let d = dispatcher(fx.policy());
    let mut handles = Vec::new();
    for i in 0..16 {
        let d = d.clone();
        let path = if i % 2 == 0 { "main.py" } else { "secret.env" };
        handles.push(tokio::spawn(async move {
            (i, d.invoke("read_file", &json!({"path": path})).await)
        }));
    }
    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result.success, i % 2 == 0);
    }
}
