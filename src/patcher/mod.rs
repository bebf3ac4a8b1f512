pub mod archive;
pub mod category;
pub mod config;
pub mod markup;
pub mod objects;
pub mod plan;
pub mod properties;
pub mod relabel;

use crate::error::{AtStage, PatchError, PatchStage, StageError};
use crate::patcher::archive::{WorkDir, repack, unpack, verify_repack};
use crate::patcher::markup::MarkupDocument;
use crate::patcher::plan::{EditSummary, PatchPlan, apply_plan};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub markup_entry: String,
    pub scratch_root: Option<PathBuf>,
    pub verify: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub entries: usize,
    pub edits: EditSummary,
    pub verified_entries: Option<usize>,
}

/// Reads and parses the markup file inside an unpacked container.
pub fn load_markup(work: &WorkDir, markup_entry: &str) -> Result<MarkupDocument, PatchError> {
    let path = work.path().join(markup_entry);
    let bytes = fs::read(&path).map_err(|err| {
        PatchError::MalformedDocument(format!("cannot read {}: {err}", path.display()))
    })?;
    let text = std::str::from_utf8(&bytes).map_err(|err| {
        PatchError::MalformedDocument(format!("{markup_entry} is not valid UTF-8: {err}"))
    })?;
    markup::parse(text)
}

/// Writes the edited tree back over the markup file.
pub fn save_markup(
    doc: &MarkupDocument,
    work: &WorkDir,
    markup_entry: &str,
) -> Result<(), PatchError> {
    let bytes = markup::serialize(doc)?;
    let path = work.path().join(markup_entry);
    fs::write(&path, bytes)
        .map_err(|err| PatchError::io(format!("failed to write {}", path.display()), err))
}

fn finish<T>(work: WorkDir, result: Result<T, StageError>) -> Result<T, StageError> {
    let path = work.path().to_path_buf();
    let cleaned = work.cleanup().at_stage(PatchStage::Cleanup);
    match (result, cleaned) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            warn!(path = %path.display(), error = %cleanup_err.error, "scratch cleanup failed after error");
            Err(err)
        }
    }
}

fn run_stages(
    work: &mut WorkDir,
    source: &Path,
    destination: &Path,
    plan: &PatchPlan,
    opts: &PatchOptions,
) -> Result<PatchOutcome, StageError> {
    let entries = unpack(source, work, &opts.markup_entry).at_stage(PatchStage::Unpack)?;
    info!(source = %source.display(), entries, "container unpacked");

    let mut doc = load_markup(work, &opts.markup_entry).at_stage(PatchStage::Load)?;
    let edits = apply_plan(&mut doc, plan).at_stage(PatchStage::Edit)?;

    if opts.dry_run {
        info!("dry run: destination left untouched");
        return Ok(PatchOutcome {
            source: source.to_path_buf(),
            destination: None,
            entries,
            edits,
            verified_entries: None,
        });
    }

    save_markup(&doc, work, &opts.markup_entry).at_stage(PatchStage::Serialize)?;
    let packed = repack(work, destination).at_stage(PatchStage::Repack)?;
    info!(destination = %destination.display(), entries = packed, "container repacked");

    let verified_entries = if opts.verify {
        match verify_repack(source, destination, &opts.markup_entry) {
            Ok(count) => Some(count),
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(destination) {
                    warn!(
                        path = %destination.display(),
                        error = %remove_err,
                        "unverified container could not be removed"
                    );
                }
                return Err(StageError {
                    stage: PatchStage::Verify,
                    error: err,
                });
            }
        }
    } else {
        None
    };

    Ok(PatchOutcome {
        source: source.to_path_buf(),
        destination: Some(destination.to_path_buf()),
        entries: packed,
        edits,
        verified_entries,
    })
}

/// Runs the whole patch: unpack, edit, serialize, repack, verify. The scratch
/// directory is removed on every exit path.
pub fn patch_container(
    source: &Path,
    destination: &Path,
    plan: &PatchPlan,
    opts: &PatchOptions,
) -> Result<PatchOutcome, StageError> {
    let mut work = WorkDir::create(opts.scratch_root.as_deref()).at_stage(PatchStage::Unpack)?;
    let result = run_stages(&mut work, source, destination, plan, opts);
    finish(work, result)
}

/// Unpacks `source` into a scratch directory, hands the parsed markup to
/// `read`, and cleans up.
pub fn with_document<T>(
    source: &Path,
    opts: &PatchOptions,
    read: impl FnOnce(&MarkupDocument) -> Result<T, PatchError>,
) -> Result<T, StageError> {
    let mut work = WorkDir::create(opts.scratch_root.as_deref()).at_stage(PatchStage::Unpack)?;
    let result = (|| {
        unpack(source, &mut work, &opts.markup_entry).at_stage(PatchStage::Unpack)?;
        let doc = load_markup(&work, &opts.markup_entry).at_stage(PatchStage::Load)?;
        read(&doc).at_stage(PatchStage::Load)
    })();
    finish(work, result)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::patcher::objects::dependency_names;
    use crate::patcher::relabel::object_labels;
    use crate::patcher::test_support::{SAMPLE_DOCUMENT, sample_plan, write_container};
    use tempfile::tempdir;

    fn options(scratch: &Path) -> PatchOptions {
        PatchOptions {
            markup_entry: "Document.xml".to_string(),
            scratch_root: Some(scratch.to_path_buf()),
            verify: true,
            dry_run: false,
        }
    }

    fn scratch_is_empty(scratch: &Path) -> bool {
        fs::read_dir(scratch).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn patch_writes_relabeled_grouped_container() {
        let tmp = tempdir().expect("tempdir");
        let scratch = tmp.path().join("scratch");
        let source = tmp.path().join("frame.FCStd");
        let dest = tmp.path().join("patched.FCStd");
        write_container(
            &source,
            &[
                ("Document.xml", SAMPLE_DOCUMENT.as_bytes()),
                ("PartShape.brp", b"shape-bytes".as_slice()),
            ],
        );

        let outcome =
            patch_container(&source, &dest, &sample_plan(), &options(&scratch)).expect("patch");
        assert_eq!(outcome.entries, 2);
        assert_eq!(outcome.verified_entries, Some(1));
        assert_eq!(outcome.edits.groups.len(), 5);
        assert!(scratch_is_empty(&scratch));

        let check = with_document(&dest, &options(&scratch), |doc| {
            Ok((object_labels(doc), dependency_names(doc, "Foundation")))
        })
        .expect("reopen");
        let labels: Vec<String> = check.0.into_iter().map(|(_, l)| l).collect();
        assert_eq!(
            &labels[..5],
            &[
                "Footing 1",
                "Footing 2",
                "Footing 3",
                "Center Column 1",
                "Left Rafter 1"
            ]
        );
        assert_eq!(
            check.1,
            Some(vec![
                "Footing_1".to_string(),
                "Footing_2".to_string(),
                "Footing_3".to_string()
            ])
        );
        assert!(scratch_is_empty(&scratch));
    }

    #[test]
    fn missing_markup_leaves_no_destination_and_no_scratch() {
        let tmp = tempdir().expect("tempdir");
        let scratch = tmp.path().join("scratch");
        let source = tmp.path().join("frame.FCStd");
        let dest = tmp.path().join("patched.FCStd");
        write_container(&source, &[("GuiDocument.xml", b"<GuiDocument/>".as_slice())]);

        let err = patch_container(&source, &dest, &sample_plan(), &options(&scratch)).unwrap_err();
        assert_eq!(err.stage, PatchStage::Unpack);
        assert!(matches!(err.error, PatchError::MalformedDocument(_)));
        assert!(!dest.exists());
        assert!(scratch_is_empty(&scratch));
    }

    #[test]
    fn edit_failure_names_edit_stage_and_cleans_up() {
        let tmp = tempdir().expect("tempdir");
        let scratch = tmp.path().join("scratch");
        let source = tmp.path().join("frame.FCStd");
        let dest = tmp.path().join("patched.FCStd");
        let without_company = SAMPLE_DOCUMENT.replace("name=\"Company\"", "name=\"Organisation\"");
        write_container(&source, &[("Document.xml", without_company.as_bytes())]);

        let err = patch_container(&source, &dest, &sample_plan(), &options(&scratch)).unwrap_err();
        assert_eq!(err.stage, PatchStage::Edit);
        assert!(matches!(err.error, PatchError::PropertyNotFound(ref name) if name == "Company"));
        assert!(!dest.exists());
        assert!(scratch_is_empty(&scratch));
    }

    #[test]
    fn verification_failure_removes_destination() {
        let tmp = tempdir().expect("tempdir");
        let scratch = tmp.path().join("scratch");
        let source = tmp.path().join("frame.FCStd");
        let dest = tmp.path().join("patched.FCStd");
        // repacked under its normalized name, so the source name goes missing
        write_container(
            &source,
            &[
                ("Document.xml", SAMPLE_DOCUMENT.as_bytes()),
                ("./GuiDocument.xml", b"<GuiDocument/>".as_slice()),
            ],
        );

        let err = patch_container(&source, &dest, &sample_plan(), &options(&scratch)).unwrap_err();
        assert_eq!(err.stage, PatchStage::Verify);
        assert!(matches!(err.error, PatchError::VerificationFailed(_)));
        assert!(!dest.exists());
        assert!(scratch_is_empty(&scratch));
    }

    #[test]
    fn dry_run_never_creates_destination() {
        let tmp = tempdir().expect("tempdir");
        let scratch = tmp.path().join("scratch");
        let source = tmp.path().join("frame.FCStd");
        let dest = tmp.path().join("patched.FCStd");
        write_container(&source, &[("Document.xml", SAMPLE_DOCUMENT.as_bytes())]);

        let mut opts = options(&scratch);
        opts.dry_run = true;
        let outcome = patch_container(&source, &dest, &sample_plan(), &opts).expect("dry run");
        assert!(outcome.destination.is_none());
        assert_eq!(outcome.edits.relabeled.len(), 5);
        assert!(!dest.exists());
    }

    #[test]
    fn unchanged_tree_round_trips_semantically() {
        let tmp = tempdir().expect("tempdir");
        let scratch = tmp.path().join("scratch");
        let source = tmp.path().join("frame.FCStd");
        let dest = tmp.path().join("copy.FCStd");
        write_container(
            &source,
            &[
                ("Document.xml", SAMPLE_DOCUMENT.as_bytes()),
                ("GuiDocument.xml", b"<GuiDocument/>".as_slice()),
            ],
        );

        let opts = options(&scratch);
        let mut work = WorkDir::create(opts.scratch_root.as_deref()).expect("workdir");
        unpack(&source, &mut work, "Document.xml").expect("unpack");
        let doc = load_markup(&work, "Document.xml").expect("load");
        save_markup(&doc, &work, "Document.xml").expect("save");
        repack(&work, &dest).expect("repack");
        work.cleanup().expect("cleanup");

        assert_eq!(verify_repack(&source, &dest, "Document.xml").expect("verify"), 1);
        let reread = with_document(&dest, &opts, |d| Ok(d.clone())).expect("reread");
        assert_eq!(reread, markup::parse(SAMPLE_DOCUMENT).expect("parse"));
    }
}
