// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Background decoding of a pack's samples.
//!
//! Binding is asynchronous: a request is queued to the loader thread, which decodes the
//! referenced samples on a rayon pool and announces the finished bank on a channel. A
//! newer request supersedes an older one; decodes that have not started yet for the old
//! request are skipped.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, span, warn, Level};

use super::loader::{LoadedSample, SampleLoader};
use super::SampleBank;
use crate::pack::SoundPack;
use crate::util::human_bytes;

/// A pack whose samples have been decoded.
pub struct PackReady {
    /// The bind request this answers. Stale generations should be ignored.
    pub generation: u64,
    pub pack: Arc<SoundPack>,
    pub bank: Arc<SampleBank>,
}

struct Request {
    generation: u64,
    pack: Arc<SoundPack>,
}

/// Decodes packs on a background thread.
pub struct PackBinder {
    requests: Option<Sender<Request>>,
    latest: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl PackBinder {
    /// Starts the loader thread. Finished banks are sent to `ready`.
    pub fn new(
        loader: SampleLoader,
        ready: Sender<PackReady>,
    ) -> Result<PackBinder, Box<dyn Error>> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_decoders())
            .thread_name(|i| format!("keyasmr-decode-{i}"))
            .build()?;
        let (requests_tx, requests_rx) = crossbeam_channel::unbounded();
        let latest = Arc::new(AtomicU64::new(0));

        let join = {
            let latest = latest.clone();
            thread::Builder::new()
                .name("keyasmr-loader".to_string())
                .spawn(move || {
                    let span = span!(Level::INFO, "pack loader");
                    let _enter = span.enter();
                    run(loader, pool, requests_rx, ready, latest);
                })?
        };

        Ok(PackBinder {
            requests: Some(requests_tx),
            latest,
            join: Some(join),
        })
    }

    /// Queues a pack for decoding and returns the generation its result will carry.
    pub fn bind(&self, pack: Arc<SoundPack>) -> u64 {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(pack = %pack.id, generation, "Queueing pack for decoding");
        if let Some(requests) = &self.requests {
            if requests.send(Request { generation, pack }).is_err() {
                warn!("Pack loader is not running");
            }
        }
        generation
    }

    /// Abandons any pending bind.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    /// The generation of the most recent bind or cancel.
    pub fn latest_generation(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }
}

impl Drop for PackBinder {
    fn drop(&mut self) {
        self.cancel();
        self.requests.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Pack loader thread panicked");
            }
        }
    }
}

fn num_decoders() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(1, 4)
}

fn run(
    loader: SampleLoader,
    pool: rayon::ThreadPool,
    requests: Receiver<Request>,
    ready: Sender<PackReady>,
    latest: Arc<AtomicU64>,
) {
    for request in requests {
        let generation = request.generation;
        if latest.load(Ordering::SeqCst) != generation {
            debug!(generation, "Skipping superseded pack");
            continue;
        }

        let start = Instant::now();
        let Some(bank) = pool.install(|| decode(&loader, &request.pack, generation, &latest)) else {
            debug!(generation, "Pack decoding cancelled");
            continue;
        };

        info!(
            pack = %request.pack.id,
            name = %request.pack.name,
            samples = bank.len(),
            memory = %human_bytes(bank.memory_size()),
            elapsed_ms = start.elapsed().as_millis(),
            "Decoded pack samples"
        );

        let ready_msg = PackReady {
            generation,
            pack: request.pack,
            bank: Arc::new(bank),
        };
        if ready.send(ready_msg).is_err() {
            debug!("Nobody is waiting for decoded packs, stopping");
            return;
        }
    }
}

/// Decodes every referenced sample of the pack. Returns None if a newer request arrived
/// while decoding.
fn decode(
    loader: &SampleLoader,
    pack: &SoundPack,
    generation: u64,
    latest: &AtomicU64,
) -> Option<SampleBank> {
    let files: Vec<&str> = pack
        .mapping
        .referenced_files()
        .into_iter()
        .filter(|file| pack.sounds.contains_key(*file))
        .collect();

    let decoded: Vec<(&str, LoadedSample)> = files
        .par_iter()
        .filter_map(|file| {
            if latest.load(Ordering::SeqCst) != generation {
                return None;
            }
            let Some(path) = pack.sample_path(file) else {
                warn!(sample = file, "Pack has no bundle directory, cannot decode sample");
                return None;
            };
            match loader.load(&path) {
                Ok(sample) => Some((*file, sample)),
                Err(e) => {
                    warn!(sample = file, path = ?path, err = %e, "Failed to decode sample");
                    None
                }
            }
        })
        .collect();

    if latest.load(Ordering::SeqCst) != generation {
        return None;
    }

    let mut bank = SampleBank::new(loader.target_sample_rate());
    for (file, sample) in decoded {
        bank.insert(file, sample, pack.gain(file));
    }
    Some(bank)
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::fs;
    use std::time::Duration;

    use super::*;
    use crate::pack::PackStore;
    use crate::testutil::write_pack;

    #[test]
    fn test_bind_decodes_referenced_samples() -> Result<(), Box<dyn Error>> {
        let temp = tempfile::tempdir()?;
        let bundle = write_pack(
            temp.path(),
            "clicky",
            "Clicky",
            &[(18, "a.wav"), (18, "b.wav"), (49, "gone.wav")],
            &["a.wav", "b.wav", "unused.wav"],
        )?;
        // A sample that fails to decode is omitted but the pack still binds.
        fs::write(bundle.join("sounds").join("b.wav"), b"not audio")?;
        let pack = Arc::new(PackStore::load(&bundle)?);

        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        let binder = PackBinder::new(SampleLoader::new(48000), ready_tx)?;
        let generation = binder.bind(pack.clone());

        let ready = ready_rx.recv_timeout(Duration::from_secs(10))?;
        assert_eq!(ready.generation, generation);
        assert_eq!(ready.pack.id, pack.id);
        assert_eq!(ready.bank.len(), 1);
        assert!(ready.bank.contains("a.wav"));
        assert!(!ready.bank.contains("b.wav"));
        assert!(!ready.bank.contains("unused.wav"));
        assert!(!ready.bank.contains("gone.wav"));
        Ok(())
    }

    #[test]
    fn test_rebind_supersedes() -> Result<(), Box<dyn Error>> {
        let temp = tempfile::tempdir()?;
        let first = write_pack(temp.path(), "first", "First", &[(18, "x.wav")], &["x.wav"])?;
        let second = write_pack(temp.path(), "second", "Second", &[(18, "y.wav")], &["y.wav"])?;

        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        let binder = PackBinder::new(SampleLoader::new(48000), ready_tx)?;
        binder.bind(Arc::new(PackStore::load(&first)?));
        let generation = binder.bind(Arc::new(PackStore::load(&second)?));
        assert_eq!(binder.latest_generation(), generation);

        // The first request may or may not finish before it is superseded, but the
        // latest one always arrives.
        loop {
            let ready = ready_rx.recv_timeout(Duration::from_secs(10))?;
            if ready.generation == generation {
                assert!(ready.bank.contains("y.wav"));
                break;
            }
        }
        Ok(())
    }

    #[test]
    fn test_cancel_drops_pending() -> Result<(), Box<dyn Error>> {
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        let binder = PackBinder::new(SampleLoader::new(48000), ready_tx)?;
        let pack = Arc::new(SoundPack::new("Empty", "", "", "1.0"));
        binder.cancel();
        let generation = binder.bind(pack);
        binder.cancel();
        assert!(binder.latest_generation() > generation);

        // Dropping joins the loader, which closes the channel.
        drop(binder);
        for ready in ready_rx.iter() {
            assert_eq!(ready.generation, generation);
        }
        Ok(())
    }
}
