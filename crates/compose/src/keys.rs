//! Desired resource keys. Each is a pure function of the group key (or the
//! rendered repository name) and the resource role.

pub fn repository(group: &str) -> String { format!("repo-{group}") }

pub fn ruleset(group: &str) -> String { format!("ruleset-{group}") }

pub fn file(group: &str, file_id: &str) -> String { format!("file-{group}-{file_id}") }

pub fn workflow_permission(group: &str) -> String { format!("action-permission-{group}") }

pub fn secret_mirror(repo_name: &str, entry: &str) -> String { format!("secret-{repo_name}-{entry}") }
