//! Repository scan: every top-level class of every `.py` file goes through
//! extract → skeletonize → validate, one JSON record per class.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::{PysliceError, Result};
use crate::extract::{extract, list_classes};
use crate::parser::{skeletonize, SourceUnit};
use crate::sandbox::{validate_with, Sandbox};

/// One scanned class (or a file that could not be read/parsed, with empty `class`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassRecord {
    pub repository: String,
    /// Path relative to the repository root
    pub file: String,
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict_detail: Option<String>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassRecord {
    fn new(repository: &str, file: &str, class: &str) -> Self {
        Self {
            repository: repository.to_string(),
            file: file.to_string(),
            class: class.to_string(),
            ..Default::default()
        }
    }

    fn fail(mut self, error: &PysliceError) -> Self {
        self.error_kind = Some(error.kind().to_string());
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanSummary {
    pub files: usize,
    pub classes: usize,
    pub extracted: usize,
    pub skeletonized: usize,
    pub valid: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// `.py` files under `root`, respecting .gitignore and the configured globs.
pub fn python_files(root: &Path, extra_ignores: &[String]) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true) // Пропускать скрытые файлы
        .git_ignore(true) // Учитывать .gitignore
        .git_global(false)
        .git_exclude(true)
        .require_git(false);

    // пользовательские паттерны через Override: !pattern означает "ignore this"
    let mut overrides = ignore::overrides::OverrideBuilder::new(root);
    for pattern in extra_ignores {
        if let Err(e) = overrides.add(&format!("!{pattern}")) {
            tracing::warn!("Invalid ignore pattern {}: {}", pattern, e);
        }
    }
    match overrides.build() {
        Ok(ov) => {
            builder.overrides(ov);
        }
        Err(e) => tracing::warn!("Failed to build ignore overrides: {}", e),
    }

    let mut files: Vec<PathBuf> = builder
        .build()
        .flatten()
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "py"))
        .collect();
    files.sort();
    files
}

/// Total and comment line counts of a source unit. A line counts as a
/// comment line when a `#` comment starts on it.
pub fn comment_stats(unit: &SourceUnit) -> (usize, usize) {
    let lines = unit.text().lines().count();
    let mut comment_rows = BTreeSet::new();
    let mut stack = vec![unit.root()];
    while let Some(node) = stack.pop() {
        if node.kind() == "comment" {
            comment_rows.insert(node.start_position().row);
            continue;
        }
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
    (lines, comment_rows.len())
}

/// Scan one repository. Failed classes are recorded and logged, never fatal.
pub fn scan_repository(
    root: &Path,
    config: &ScanConfig,
    sandbox: &dyn Sandbox,
) -> Result<(Vec<ClassRecord>, ScanSummary)> {
    let start = Instant::now();
    let root = root.canonicalize()?;
    let repository = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());

    let files = python_files(&root, &config.ignore);
    tracing::info!(repository = %repository, files = files.len(), "scanning repository");

    let done = AtomicUsize::new(0);
    let work = || {
        files
            .par_iter()
            .flat_map_iter(|path| {
                let records = scan_file(&root, &repository, path, sandbox);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if n % 100 == 0 {
                    tracing::debug!(done = n, total = files.len(), "scan progress");
                }
                records
            })
            .collect::<Vec<_>>()
    };

    let records = match config.parallel_workers {
        Some(workers) if workers > 0 => rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| PysliceError::Internal(e.into()))?
            .install(work),
        _ => work(),
    };

    let summary = summarize(&records, files.len(), start);
    tracing::info!(
        repository = %repository,
        classes = summary.classes,
        valid = summary.valid,
        failed = summary.failed,
        elapsed_ms = summary.elapsed_ms,
        "scan complete"
    );
    Ok((records, summary))
}

fn summarize(records: &[ClassRecord], files: usize, start: Instant) -> ScanSummary {
    let classes: Vec<&ClassRecord> = records.iter().filter(|r| !r.class.is_empty()).collect();
    ScanSummary {
        files,
        classes: classes.len(),
        extracted: classes.iter().filter(|r| r.lines.is_some()).count(),
        skeletonized: classes.iter().filter(|r| r.unit_count.is_some()).count(),
        valid: classes.iter().filter(|r| r.valid).count(),
        failed: records.iter().filter(|r| r.error_kind.is_some()).count(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    }
}

fn scan_file(
    root: &Path,
    repository: &str,
    path: &Path,
    sandbox: &dyn Sandbox,
) -> Vec<ClassRecord> {
    let file = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();

    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            let error = PysliceError::Io(e);
            tracing::warn!(file = %file, error = %error, "failed to read file");
            return vec![ClassRecord::new(repository, &file, "").fail(&error)];
        }
    };

    let classes = match list_classes(&source) {
        Ok(classes) => classes,
        Err(error) => {
            tracing::warn!(file = %file, error = %error, "failed to parse file");
            return vec![ClassRecord::new(repository, &file, "").fail(&error)];
        }
    };

    classes
        .iter()
        .map(|class| scan_class(repository, &file, &source, class, sandbox))
        .collect()
}

fn scan_class(
    repository: &str,
    file: &str,
    source: &str,
    class: &str,
    sandbox: &dyn Sandbox,
) -> ClassRecord {
    let record = ClassRecord::new(repository, file, class);

    let unit = match extract(source, class).and_then(SourceUnit::parse) {
        Ok(unit) => unit,
        Err(error) => {
            tracing::warn!(repository, file, class, error = %error, "extraction failed");
            return record.fail(&error);
        }
    };

    let (lines, comment_lines) = comment_stats(&unit);
    let mut record = ClassRecord {
        lines: Some(lines),
        comment_lines: Some(comment_lines),
        comment_ratio: Some(if lines == 0 {
            0.0
        } else {
            comment_lines as f64 / lines as f64
        }),
        ..record
    };

    match skeletonize(unit.text()) {
        Ok(skeleton) => {
            record.unit_count = Some(skeleton.unit_count);
            record.docstring_count = Some(skeleton.docstring_count);
        }
        Err(error) => {
            tracing::warn!(repository, file, class, error = %error, "skeleton failed");
            record = record.fail(&error);
        }
    }

    let verdict = validate_with(sandbox, unit.text());
    record.valid = verdict.is_valid();
    record.verdict = Some(verdict.tag().to_string());
    if !verdict.is_valid() {
        record.verdict_detail = Some(verdict.to_string());
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::StaticSandbox;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_python_files_respects_ignores() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pkg/a.py", "class A: pass\n");
        write(dir.path(), "pkg/b.txt", "not python\n");
        write(dir.path(), "build/gen.py", "class G: pass\n");
        write(dir.path(), "skipped/c.py", "class C: pass\n");
        write(dir.path(), ".gitignore", "skipped/\n");

        let files = python_files(dir.path(), &["build".to_string()]);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["pkg/a.py"]);
    }

    #[test]
    fn test_comment_stats() {
        let unit = SourceUnit::parse(
            "# header\nclass A:\n    x = 1  # trailing\n    s = '# not a comment'\n",
        )
        .unwrap();
        assert_eq!(comment_stats(&unit), (4, 2));
    }

    #[test]
    fn test_scan_repository_records() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("demo");
        write(
            &repo,
            "widgets.py",
            "import os\nimport nonexistent_pkg\n\n# helpers\nclass Good:\n    \"\"\"Doc.\"\"\"\n    def f(self):\n        return nonexistent_pkg.foo, os.sep\n\nclass Bad:\n    def f(self):\n        return helper_from_project()\n",
        );
        write(&repo, "broken.py", "class Broken(:\n");

        let config = ScanConfig::default();
        let (records, summary) =
            scan_repository(&repo, &config, &StaticSandbox::default()).unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.classes, 2);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.failed, 1);

        let good = records.iter().find(|r| r.class == "Good").unwrap();
        assert_eq!(good.repository, "demo");
        assert_eq!(good.file, "widgets.py");
        assert!(good.valid);
        assert_eq!(good.unit_count, Some(2));
        assert_eq!(good.docstring_count, Some(1));
        assert_eq!(good.verdict.as_deref(), Some("valid"));

        let bad = records.iter().find(|r| r.class == "Bad").unwrap();
        assert!(!bad.valid);
        assert_eq!(bad.verdict.as_deref(), Some("undefined_reference"));

        let broken = records.iter().find(|r| r.file == "broken.py").unwrap();
        assert_eq!(broken.class, "");
        assert_eq!(broken.error_kind.as_deref(), Some("syntax_invalid"));
    }

    #[test]
    fn test_scan_with_fixed_worker_pool() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "m.py", "class A:\n    pass\n\nclass B(A):\n    pass\n");
        let config = ScanConfig {
            ignore: Vec::new(),
            parallel_workers: Some(2),
        };
        let (records, summary) =
            scan_repository(dir.path(), &config, &StaticSandbox::default()).unwrap();
        assert_eq!(records.len(), 2);
        // B наследует A, которого нет в извлечённом модуле
        assert_eq!(summary.valid, 1);
        let json = serde_json::to_string(&records[0]).unwrap();
        assert!(json.contains("\"repository\""));
        assert!(!json.contains("\"error\""));
    }
}
