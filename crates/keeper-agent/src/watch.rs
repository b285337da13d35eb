use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

const MAX_DEPTH: usize = 16;

/// Paths a watching supervisor polls, with the fallback to `cwd` and then
/// the supervisor's own directory.
pub(crate) fn resolve_watch_paths(spec: &keeper_process::ProcessSpec) -> Vec<PathBuf> {
    let base = spec
        .cwd()
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    if spec.watch_paths().is_empty() {
        return vec![base];
    }
    spec.watch_paths()
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { base.join(p) })
        .collect()
}

/// Hash over (path, mtime, length) of every non-hidden file below `roots`.
///
/// Missing roots hash as empty so that creating one counts as a change.
pub(crate) fn fingerprint(roots: &[PathBuf]) -> u64 {
    let mut entries = Vec::new();
    for root in roots {
        collect(root, 0, &mut entries);
    }
    entries.sort();

    let mut hasher = DefaultHasher::new();
    entries.hash(&mut hasher);
    hasher.finish()
}

fn collect(path: &Path, depth: usize, out: &mut Vec<(PathBuf, u128, u64)>) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.is_file() {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        out.push((path.to_path_buf(), mtime, meta.len()));
        return;
    }
    if !meta.is_dir() || depth >= MAX_DEPTH {
        return;
    }
    let Ok(dir) = std::fs::read_dir(path) else {
        return;
    };
    for entry in dir.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        collect(&entry.path(), depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("keeper-watch-{tag}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn fingerprint_changes_when_file_added() {
        let dir = scratch_dir("add");
        let before = fingerprint(std::slice::from_ref(&dir));
        std::fs::write(dir.join("app.py"), "print('hi')").unwrap();
        let after = fingerprint(std::slice::from_ref(&dir));
        assert_ne!(before, after);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fingerprint_ignores_hidden_entries() {
        let dir = scratch_dir("hidden");
        std::fs::write(dir.join("main.rs"), "fn main() {}").unwrap();
        let before = fingerprint(std::slice::from_ref(&dir));
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        std::fs::write(dir.join(".git").join("HEAD"), "ref").unwrap();
        std::fs::write(dir.join(".swp"), "x").unwrap();
        let after = fingerprint(std::slice::from_ref(&dir));
        assert_eq!(before, after);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fingerprint_is_stable_without_changes() {
        let dir = scratch_dir("stable");
        std::fs::write(dir.join("a"), "1").unwrap();
        let roots = vec![dir.clone()];
        assert_eq!(fingerprint(&roots), fingerprint(&roots));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn relative_watch_paths_resolve_against_cwd() {
        let spec = keeper_process::ProcessSpec::new("sleep")
            .with_cwd("/srv/app")
            .with_watch(true)
            .with_watch_paths(["src", "/etc/app.conf"]);
        let paths = resolve_watch_paths(&spec);
        assert_eq!(
            paths,
            vec![PathBuf::from("/srv/app/src"), PathBuf::from("/etc/app.conf")]
        );
    }

    #[test]
    fn default_watch_path_is_cwd() {
        let spec = keeper_process::ProcessSpec::new("sleep").with_cwd("/srv/app");
        assert_eq!(resolve_watch_paths(&spec), vec![PathBuf::from("/srv/app")]);
    }
}
