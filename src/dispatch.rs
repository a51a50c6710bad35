//! Managed dispatcher: root hands out sequence indices to a pull-based pool of workers,
//! workers apply a function locally and report results back. Built on top of
//! [`Communicator::recv_raw`] because root decodes a different type depending on
//! which tag arrived (a result for `Default`, a failed index for `Failed`).
//!
//! Internally this is one protocol with two public faces: [`map_unordered`] returns
//! the results at root, [`split_managed`] hands each worker its own assigned slice
//! with nothing round-tripped back to root beyond bookkeeping.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{CborCodec, Codec};
use crate::communicator::Communicator;
use crate::constants::{ANY_SOURCE, ANY_TAG, ROOT};
use crate::error::{Error, Result};

/// Protocol tags, local to the cloned communicator each dispatch run uses — distinct
/// from user tags, and not meaningful outside a single managed-dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Start = 1,
    Stop = 2,
    Default = 3,
    Failed = 4,
}

impl Tag {
    fn from_i32(v: i32) -> Option<Tag> {
        match v {
            1 => Some(Tag::Start),
            2 => Some(Tag::Stop),
            3 => Some(Tag::Default),
            4 => Some(Tag::Failed),
            _ => None,
        }
    }
}

/// Apply `func` to every item of `sequence`, distributing work over a pull-based pool
/// of workers and collecting results at root in arrival order (not sequence order).
/// On root, returns every result; on every other rank, returns an empty vector (a
/// worker never sees anyone else's results).
///
/// If `func` returns `Err` for some item, the worker that hit it reports the index it
/// was working on and stops; once every worker has finished, root raises
/// [`Error::IteratorNotConsumed`] naming every such failure, matching the original's
/// behaviour of never silently dropping an item a worker couldn't process.
///
/// Runs on a [`Communicator::clone`] of `parent` so the dispatcher's own `Start`/
/// `Stop`/`Default`/`Failed` traffic can never collide with the caller's own tags.
pub fn map_unordered<T, R, F>(parent: &mut Communicator, sequence: &[T], func: F) -> Result<Vec<R>>
where
    F: Fn(&T) -> Result<R>,
    R: Clone + Serialize + DeserializeOwned,
{
    if parent.size() == 1 {
        return sequence.iter().map(|v| func(v)).collect();
    }

    let mut comm = parent.clone()?;
    if comm.rank() == ROOT {
        root_dispatch(&mut comm, Some(sequence.len()))
    } else {
        worker_loop(&mut comm, sequence, func)?;
        Ok(Vec::new())
    }
}

/// The non-indexable counterpart of [`map_unordered`]: `sequence` is consumed once by
/// walking it, matching by position rather than slice indexing, for sources that
/// can't be sliced. `sequence` is an [`ExactSizeIterator`], so root still knows the
/// sequence's length up front and [`Error::IteratorNotConsumed`] still fires on an
/// exhaustion mismatch, exactly as it does for [`map_unordered`].
pub fn map_unordered_iter<T, R, F>(
    parent: &mut Communicator,
    sequence: impl ExactSizeIterator<Item = T>,
    func: F,
) -> Result<Vec<R>>
where
    F: Fn(&T) -> Result<R>,
    R: Clone + Serialize + DeserializeOwned,
{
    if parent.size() == 1 {
        return sequence.map(|v| func(&v)).collect();
    }

    let length = sequence.len();
    let mut comm = parent.clone()?;
    if comm.rank() == ROOT {
        root_dispatch(&mut comm, Some(length))
    } else {
        worker_loop_iter(&mut comm, sequence, func)?;
        Ok(Vec::new())
    }
}

/// Distribute `sequence` over the worker pool with no result round-tripped to root:
/// each non-root rank gets back exactly the items root assigned it, to process
/// however it likes locally. Root gets back an empty vector.
pub fn split_managed<T>(parent: &mut Communicator, sequence: &[T]) -> Result<Vec<T>>
where
    T: Clone + Serialize + DeserializeOwned,
{
    if parent.size() == 1 {
        return Ok(sequence.to_vec());
    }

    let mut comm = parent.clone()?;
    if comm.rank() == ROOT {
        root_dispatch::<T>(&mut comm, Some(sequence.len()))?;
        Ok(Vec::new())
    } else {
        worker_loop_collecting(&mut comm, sequence, |v: &T| Ok(v.clone()))
    }
}

/// Root's side: pull-based dispatch loop. Hands out indices on request, collects
/// `Default`-tagged results, tracks `Failed`-tagged reports, and runs until every
/// worker has sent `Stop` or `Failed`.
fn root_dispatch<R: DeserializeOwned>(comm: &mut Communicator, length: Option<usize>) -> Result<Vec<R>> {
    let mut workers = comm.size() - 1;
    let mut next_index: i64 = 0;
    let mut failed: Vec<(usize, i64)> = Vec::new();
    let mut results = Vec::new();

    while workers > 0 {
        let (status, payload) = comm.recv_raw(ANY_SOURCE)?;
        let tag = Tag::from_i32(status.tag);

        if matches!(tag, Some(Tag::Start) | Some(Tag::Default)) {
            comm.send(&next_index, status.source, 0)?;
            next_index += 1;
        }
        if matches!(tag, Some(Tag::Default)) {
            results.push(CborCodec.decode(&payload)?);
        }
        if matches!(tag, Some(Tag::Failed)) {
            let last_index: i64 = CborCodec.decode(&payload)?;
            failed.push((status.source, last_index));
        }
        if matches!(tag, Some(Tag::Stop) | Some(Tag::Failed)) {
            workers -= 1;
            tracing::debug!(workers, "managed dispatch: worker finished");
        }
    }

    if length.is_some() || !failed.is_empty() {
        let exhausted = length.map_or(true, |len| (len as i64) < next_index);
        if !failed.is_empty() || !exhausted {
            let mut report = String::new();
            for (rank, index) in &failed {
                report.push_str(&format!("worker {rank} failed at index {index}\n"));
            }
            if let Some(len) = length {
                report.push_str(&format!("{len} items, {next_index} indices issued\n"));
            }
            return Err(Error::IteratorNotConsumed { report });
        }
    }

    Ok(results)
}

/// Runs `func` against every item this worker is handed, sending `Start` first, then
/// `Default`-tagged results after each applied item, tracking the last index attempted
/// so a mid-run failure can still be reported accurately.
fn worker_attempt<T, R, F>(comm: &mut Communicator, sequence: &[T], func: &F) -> (i64, Vec<R>, Result<()>)
where
    F: Fn(&T) -> Result<R>,
    R: Clone + Serialize,
{
    let mut last_index: i64 = -1;
    let mut collected: Vec<R> = Vec::new();
    let outcome = (|| -> Result<()> {
        comm.send(&(), ROOT, Tag::Start as i32)?;
        let mut next_index: i64 = comm.recv(ROOT as i32, ANY_TAG, None)?;
        loop {
            if next_index < 0 {
                break;
            }
            let Some(val) = sequence.get(next_index as usize) else {
                break;
            };
            last_index = next_index;
            let result = func(val)?;
            comm.send(&result, ROOT, Tag::Default as i32)?;
            collected.push(result);
            next_index = comm.recv(ROOT as i32, ANY_TAG, None)?;
        }
        Ok(())
    })();
    (last_index, collected, outcome)
}

/// The non-indexable counterpart of [`worker_attempt`]: `sequence` is walked once and
/// matched by position rather than sliced.
fn worker_attempt_iter<T, R, F>(
    comm: &mut Communicator,
    sequence: impl Iterator<Item = T>,
    func: &F,
) -> (i64, Vec<R>, Result<()>)
where
    F: Fn(&T) -> Result<R>,
    R: Clone + Serialize,
{
    let mut last_index: i64 = -1;
    let mut collected: Vec<R> = Vec::new();
    let outcome = (|| -> Result<()> {
        comm.send(&(), ROOT, Tag::Start as i32)?;
        let mut next_index: i64 = comm.recv(ROOT as i32, ANY_TAG, None)?;
        for (position, val) in sequence.enumerate() {
            if next_index < 0 {
                break;
            }
            if position as i64 != next_index {
                continue;
            }
            last_index = next_index;
            let result = func(&val)?;
            comm.send(&result, ROOT, Tag::Default as i32)?;
            collected.push(result);
            next_index = comm.recv(ROOT as i32, ANY_TAG, None)?;
        }
        Ok(())
    })();
    (last_index, collected, outcome)
}

/// Closes out a worker's run: `Stop` on success, `Failed` (with the last index
/// attempted) on error, re-raising the error either way so the caller still learns
/// about the failure.
fn finish(comm: &mut Communicator, last_index: i64, outcome: Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => comm.send(&(), ROOT, Tag::Stop as i32),
        Err(e) => {
            comm.send(&last_index, ROOT, Tag::Failed as i32)?;
            Err(e)
        }
    }
}

fn worker_loop<T, R, F>(comm: &mut Communicator, sequence: &[T], func: F) -> Result<()>
where
    F: Fn(&T) -> Result<R>,
    R: Clone + Serialize,
{
    let (last_index, _collected, outcome) = worker_attempt(comm, sequence, &func);
    finish(comm, last_index, outcome)
}

fn worker_loop_iter<T, R, F>(comm: &mut Communicator, sequence: impl Iterator<Item = T>, func: F) -> Result<()>
where
    F: Fn(&T) -> Result<R>,
    R: Clone + Serialize,
{
    let (last_index, _collected, outcome) = worker_attempt_iter(comm, sequence, &func);
    finish(comm, last_index, outcome)
}

fn worker_loop_collecting<T, R, F>(comm: &mut Communicator, sequence: &[T], func: F) -> Result<Vec<R>>
where
    F: Fn(&T) -> Result<R>,
    R: Clone + Serialize,
{
    let (last_index, collected, outcome) = worker_attempt(comm, sequence, &func);
    finish(comm, last_index, outcome)?;
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::Tag;

    #[test]
    fn tag_round_trips_through_i32() {
        for tag in [Tag::Start, Tag::Stop, Tag::Default, Tag::Failed] {
            assert_eq!(Tag::from_i32(tag as i32), Some(tag));
        }
    }

    #[test]
    fn unknown_tag_value_is_not_a_dispatch_tag() {
        assert_eq!(Tag::from_i32(99), None);
    }
}
