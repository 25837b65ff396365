//! The parse workers.
//!
//! Each worker loops on the request ring. For every request it claims the node, loads the file
//! without holding any lock, then commits the result under the stripe write lock if the node it
//! claimed is still resident.

use std::{
    path::Path,
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use dbgi_core::{Decompress, FileFormat, ENCODING_VERSION, MAGIC};

use crate::{
    error::Error,
    event::{Event, EventKind},
    loaded::Loaded,
    metrics::Metric,
    ring::RequestMessage,
    sys::Mapping,
    Shared,
};

pub(crate) fn run(shared: Arc<Shared>) {
    while let Some(request) = shared.requests.dequeue() {
        if shared.requests.is_shutdown() {
            // Nobody is left to read the results.
            continue;
        }
        tracing::trace!(path = %request.path, min_timestamp = request.min_timestamp, "dequeued");
        handle(&shared, request);
    }
    tracing::trace!("parse worker exiting");
}

fn handle(shared: &Shared, request: RequestMessage) {
    let (stripe, slot) = shared.map.locate(&request.path);

    let claimed = {
        let state = stripe.state.read();
        match state.find_exact(slot, &request.path, request.min_timestamp) {
            None => None,
            Some(index) => {
                let node = state.node(index);
                if !node.parse_done() && node.counters.try_claim() {
                    Some((state.node_ref(index), node.counters.clone()))
                } else {
                    None
                }
            }
        }
    };
    let Some((node_ref, counters)) = claimed else {
        // Closed already, loaded already, or another worker has it.
        return;
    };

    shared.publish(EventKind::ParseStarted, &request.path);
    tracing::debug!(path = %request.path, min_timestamp = request.min_timestamp, "parse started");
    shared.metrics.count(Metric::ParsesRun);

    let loaded = {
        let _timer = shared.metrics.record(Metric::ParseTime);
        load(Path::new(&request.path), &*shared.decompressor)
    };

    match loaded.error() {
        Some(Error::UnsupportedFormat(format)) => {
            tracing::debug!(path = %request.path, ?format, "unsupported format");
            shared.publish(EventKind::UnsupportedFormat, &request.path);
        }
        Some(e) => tracing::debug!(path = %request.path, error = %e, "parse failed"),
        None => {}
    }

    let stale = {
        let mut state = stripe.state.write();
        match state.resolve_mut(node_ref) {
            Some(node) => {
                node.loaded = Some(Arc::new(loaded));
                None
            }
            // The node was closed down and possibly reused while we were working. Drop the
            // result outside of the lock.
            None => Some(loaded),
        }
    };
    counters.is_working.store(false, Ordering::Release);

    if let Some(stale) = stale {
        shared.metrics.count(Metric::StaleParseResults);
        tracing::debug!(path = %request.path, "discarding stale parse result");
        drop(stale);
        return;
    }

    stripe.notify();
    shared.publish(EventKind::ParseEnded, &request.path);
    tracing::debug!(path = %request.path, min_timestamp = request.min_timestamp, "parse ended");
}

/// Load the debug info for `path`. Failures are folded into the result.
pub(crate) fn load(path: &Path, decompressor: &dyn Decompress) -> Loaded {
    match try_load(path, decompressor) {
        Ok(loaded) => loaded,
        Err(e) => Loaded::failed(e),
    }
}

fn try_load(path: &Path, decompressor: &dyn Decompress) -> Result<Loaded, Error> {
    let mapping = Mapping::open(path)?;
    let mapping = match FileFormat::sniff(mapping.as_slice()) {
        // Unrecognised files go through the parser, which reports what is wrong with them.
        FileFormat::Container | FileFormat::Unknown => mapping,
        FileFormat::Pdb => {
            drop(mapping);
            companion_container(path)?.ok_or(Error::UnsupportedFormat(FileFormat::Pdb))?
        }
        other => return Err(Error::UnsupportedFormat(other)),
    };

    let layout = dbgi_core::parse(mapping.as_slice())?;
    if layout.unpacked_size().is_none() {
        return Ok(Loaded::mapped(mapping, layout));
    }

    let image = dbgi_core::unpack(mapping.as_slice(), &layout, decompressor)?;
    let layout = dbgi_core::parse(&image)?;
    Ok(Loaded::unpacked(mapping, image, layout))
}

/// Find the container converted from the PDB at `pdb_path`: the file with the same stem and an
/// `.rdi` extension, if it is newer than the PDB and of the current encoding version.
fn companion_container(pdb_path: &Path) -> Result<Option<Mapping>, Error> {
    let companion = pdb_path.with_extension("rdi");
    let Ok(companion_meta) = std::fs::metadata(&companion) else {
        return Ok(None);
    };
    let pdb_modified = std::fs::metadata(pdb_path)?.modified()?;
    if companion_meta.modified()? <= pdb_modified {
        tracing::debug!(path = %companion.display(), "companion container is out of date");
        return Ok(None);
    }

    let mapping = Mapping::open(&companion)?;
    let current = dbgi_core::Header::decode(mapping.as_slice())
        .map_or(false, |h| h.magic == MAGIC && h.encoding_version == ENCODING_VERSION);
    if !current {
        tracing::debug!(path = %companion.display(), "companion container has another version");
        return Ok(None);
    }
    Ok(Some(mapping))
}

impl Shared {
    /// Publish an event without waiting for room in the ring.
    pub(crate) fn publish(&self, kind: EventKind, path: &str) {
        let event = Event {
            kind,
            path: path.to_owned(),
        };
        if !self.events.enqueue(&event, Some(Instant::now())) {
            tracing::trace!(?kind, path, "event ring full, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgi_core::{ContainerBuilder, SectionTag};
    use std::time::{Duration, SystemTime};

    fn no_decompress(_: &[u8], _: &mut [u8]) -> Result<(), dbgi_core::DecompressError> {
        Err(dbgi_core::DecompressError("unexpected".into()))
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn set_modified(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn loads_plain_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "a.rdi",
            &ContainerBuilder::new()
                .section(SectionTag::UNITS, vec![9; 40])
                .build(),
        );
        let loaded = load(&path, &no_decompress);
        assert!(loaded.error().is_none());
        assert_eq!(loaded.sections().len(), 1);
        assert!(!loaded.was_unpacked());
    }

    #[test]
    fn failures_are_folded() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = write(dir.path(), "garbage.bin", b"\xde\xad\xbe\xef");
        assert!(matches!(
            load(&garbage, &no_decompress).error(),
            Some(Error::Malformed(dbgi_core::ParseStatus::HeaderDoesNotMatch))
        ));

        let elf = write(dir.path(), "a.out", b"\x7fELF\x02\x01\x01\x00");
        assert!(matches!(
            load(&elf, &no_decompress).error(),
            Some(Error::UnsupportedFormat(FileFormat::Elf))
        ));

        let mut truncated = ContainerBuilder::new()
            .section(SectionTag::UNITS, vec![9; 40])
            .build();
        truncated.truncate(60);
        let truncated = write(dir.path(), "truncated.rdi", &truncated);
        assert!(matches!(
            load(&truncated, &no_decompress).error(),
            Some(Error::Malformed(_))
        ));

        assert!(matches!(
            load(&dir.path().join("missing.rdi"), &no_decompress).error(),
            Some(Error::Io(_))
        ));
    }

    #[test]
    fn pdb_uses_fresh_companion() {
        let dir = tempfile::tempdir().unwrap();
        let pdb = write(dir.path(), "app.pdb", b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0");
        assert!(matches!(
            load(&pdb, &no_decompress).error(),
            Some(Error::UnsupportedFormat(FileFormat::Pdb))
        ));

        let companion = write(
            dir.path(),
            "app.rdi",
            &ContainerBuilder::new()
                .section(SectionTag::PROCEDURES, vec![1; 16])
                .build(),
        );
        let now = SystemTime::now();
        set_modified(&pdb, now - Duration::from_secs(60));
        set_modified(&companion, now);
        let loaded = load(&pdb, &no_decompress);
        assert!(loaded.error().is_none());
        assert_eq!(loaded.sections()[0].tag, SectionTag::PROCEDURES);

        // An out-of-date companion is ignored.
        set_modified(&companion, now - Duration::from_secs(120));
        assert!(matches!(
            load(&pdb, &no_decompress).error(),
            Some(Error::UnsupportedFormat(FileFormat::Pdb))
        ));
    }
}
