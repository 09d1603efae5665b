use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use crossterm::style::{self, Stylize};
use oci_spec::distribution::Reference;

use crate::archive::{self, PlannedArchive, SavedArchive};
use crate::config::AppConfig;
use crate::fetch;
use crate::manifest;
use crate::progress::{self, Spinner, format_bytes};
use crate::runtime::ContainerRuntime;
use crate::runtime::cli::CliRuntime;

pub fn run(cfg: &AppConfig) -> Result<()> {
    let text = manifest::load(&cfg.manifest)?;
    let images = manifest::collect_images(&text)
        .with_context(|| format!("Failed to scan {}", cfg.manifest.display()))?;
    let plan = archive::plan(&manifest::unique_images(images));

    if plan.is_empty() {
        progress::warn(format!(
            "No image references found in {}",
            cfg.manifest.display()
        ));
        return Ok(());
    }

    report_collisions(&plan);

    if cfg.dry_run {
        print_plan(&plan, &cfg.output_dir)?;
        return Ok(());
    }

    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("Failed to create {}", cfg.output_dir.display()))?;

    eprintln!(
        "{} {} ({} image{})",
        "Runtime".dim(),
        style::style(&cfg.runtime_path).green().bold(),
        plan.len(),
        if plan.len() == 1 { "" } else { "s" }
    );

    let runtime = CliRuntime::new(cfg.runtime_path.clone(), cfg.runtime);
    let saved = bundle(&runtime, &plan, &cfg.output_dir)?;

    let total: u64 = saved.iter().map(|a| a.compressed_bytes).sum();
    eprintln!(
        "{} Saved {} archive{} ({}) to {}",
        "✔".green(),
        saved.len(),
        if saved.len() == 1 { "" } else { "s" },
        format_bytes(total),
        style::style(cfg.output_dir.display()).cyan()
    );

    Ok(())
}

/// Fetch and archive every planned image in order. The first failure aborts
/// the remaining images.
pub fn bundle(
    runtime: &dyn ContainerRuntime,
    plan: &[PlannedArchive],
    dir: &Path,
) -> Result<Vec<SavedArchive>> {
    let mut saved = Vec::with_capacity(plan.len());

    for (i, item) in plan.iter().enumerate() {
        let reference = item.reference.as_str();
        let spinner = Spinner::new(format!(
            "[{}/{}] Resolving {reference} ...",
            i + 1,
            plan.len()
        ));

        let availability = fetch::ensure_present(runtime, reference, &spinner)
            .with_context(|| format!("Failed to fetch {reference}"))?;

        spinner.set_message(format!("[{}/{}] Saving {reference}", i + 1, plan.len()));
        spinner.track_bytes(availability.size_hint());

        let written = archive::write_archive(runtime, reference, dir, Some(&spinner))
            .with_context(|| format!("Failed to save {reference} as {}", item.file_name))?;
        log::debug!(
            "{} holds {} bytes of image tar",
            written.path.display(),
            written.raw_bytes
        );

        spinner.finish(format!(
            "{reference} -> {} ({})",
            style::style(&item.file_name).cyan(),
            format_bytes(written.compressed_bytes)
        ));
        saved.push(written);
    }

    Ok(saved)
}

fn report_collisions(plan: &[PlannedArchive]) {
    for (file_name, references) in archive::collisions(plan) {
        let kept = references.last().copied().unwrap_or_default();
        progress::warn(format!(
            "{} is shared by {}; the archive will hold {kept}",
            file_name,
            references.join(", ")
        ));
    }
}

fn print_plan(plan: &[PlannedArchive], dir: &Path) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for item in plan {
        writeln!(
            stdout,
            "{} -> {}{}",
            item.reference,
            dir.join(&item.file_name).display(),
            describe(&item.reference)
        )?;
    }
    Ok(())
}

/// `  (registry/repository, tag x)` when the reference parses, else nothing.
fn describe(reference: &str) -> String {
    match Reference::try_from(reference) {
        Ok(r) => {
            let version = match (r.tag(), r.digest()) {
                (_, Some(digest)) => format!("digest {digest}"),
                (Some(tag), None) => format!("tag {tag}"),
                (None, None) => "tag latest".to_string(),
            };
            format!("  ({}/{}, {version})", r.resolve_registry(), r.repository())
        }
        Err(_) => {
            log::debug!("{reference} is not a well-formed image reference");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::Read;

    use super::*;
    use crate::fetch::fake::{Call, FakeRuntime};

    fn plan_for(manifest_text: &str) -> Vec<PlannedArchive> {
        let images = manifest::collect_images(manifest_text).unwrap();
        archive::plan(&manifest::unique_images(images))
    }

    fn files_in(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn no_images_means_no_runtime_calls() {
        let dir = tempfile::tempdir().unwrap();
        let rt = FakeRuntime::default();
        let plan = plan_for("kind: Service\n---\nkind: ConfigMap\ndata: {a: b}\n");

        let saved = bundle(&rt, &plan, dir.path()).unwrap();
        assert!(saved.is_empty());
        assert!(rt.calls().is_empty());
        assert!(files_in(dir.path()).is_empty());
    }

    #[test]
    fn two_documents_same_image_produce_one_archive() {
        let dir = tempfile::tempdir().unwrap();
        let rt = FakeRuntime::default();
        let plan = plan_for(
            "spec: {containers: [{image: \"alpine:3.18\"}]}\n---\nimage: \"alpine:3.18\"\n",
        );

        bundle(&rt, &plan, dir.path()).unwrap();

        assert_eq!(
            rt.calls(),
            vec![
                Call::Inspect("alpine:3.18".into()),
                Call::Pull("alpine:3.18".into()),
                Call::Save("alpine:3.18".into()),
            ]
        );
        assert_eq!(files_in(dir.path()), BTreeSet::from(["alpine.tar.gz".to_string()]));
    }

    #[test]
    fn repeated_reference_is_fetched_once() {
        let dir = tempfile::tempdir().unwrap();
        let rt = FakeRuntime::with_local(&["redis:7"]);
        let plan = plan_for(
            "a: {image: \"redis:7\"}\nb: [{c: {image: \"redis:7\"}}]\n---\nimage: redis:7\n---\nimage: redis:7\n",
        );

        bundle(&rt, &plan, dir.path()).unwrap();

        let inspects = rt
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Inspect(_)))
            .count();
        assert_eq!(inspects, 1);
        assert!(!rt.calls().iter().any(|c| matches!(c, Call::Pull(_))));
        assert_eq!(files_in(dir.path()).len(), 1);
    }

    #[test]
    fn pull_happens_before_save_only_for_missing_images() {
        let dir = tempfile::tempdir().unwrap();
        let rt = FakeRuntime::with_local(&["alpine:3.18"]);
        let plan = plan_for("a: {image: \"alpine:3.18\"}\nb: {image: \"nginx:1.25\"}\n");

        bundle(&rt, &plan, dir.path()).unwrap();

        assert_eq!(
            rt.calls(),
            vec![
                Call::Inspect("alpine:3.18".into()),
                Call::Save("alpine:3.18".into()),
                Call::Inspect("nginx:1.25".into()),
                Call::Pull("nginx:1.25".into()),
                Call::Save("nginx:1.25".into()),
            ]
        );
        assert_eq!(
            files_in(dir.path()),
            BTreeSet::from(["alpine.tar.gz".to_string(), "nginx.tar.gz".to_string()])
        );
    }

    #[test]
    fn same_repository_tags_share_one_file_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let rt = FakeRuntime::default();
        let plan = plan_for("a: {image: \"nginx:1.25\"}\nb: {image: \"nginx:1.24\"}\n");

        let saved = bundle(&rt, &plan, dir.path()).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(files_in(dir.path()), BTreeSet::from(["nginx.tar.gz".to_string()]));

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(fs::File::open(dir.path().join("nginx.tar.gz")).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "tar stream of nginx:1.25");
    }

    #[test]
    fn first_failure_aborts_remaining_images() {
        let dir = tempfile::tempdir().unwrap();
        let rt = FakeRuntime {
            failing_pulls: vec!["a/private:1".into()],
            ..Default::default()
        };
        let plan = plan_for("x: {image: \"a/private:1\"}\ny: {image: \"b/public:1\"}\n");

        let err = bundle(&rt, &plan, dir.path()).unwrap_err();
        assert!(err.to_string().contains("a/private:1"));
        assert!(!rt.calls().iter().any(|c| matches!(c, Call::Inspect(r) if r == "b/public:1")));
        assert!(files_in(dir.path()).is_empty());
    }

    #[test]
    fn describes_parseable_references() {
        let text = describe("registry.example.com/team/app:1.2");
        assert!(text.contains("registry.example.com/team/app"));
        assert!(text.contains("tag 1.2"));
    }
}
