use anyhow::{bail, Result};

use crate::file_system;
use crate::rng::MtRand;

/// Seed used when none is given and none can be derived from CI metadata.
pub const DEFAULT_SEED: i64 = 123_456_789;

/// Deterministically assigns a subset of the test suite to one of `total`
/// parallel workers. Every worker runs the same derivation from the same
/// inputs, so the shards are disjoint and cover the suite without any
/// coordination between workers.
#[derive(Debug)]
pub struct Sharder {
    index: usize,
    total: usize,
    seed: i64,
}

impl Sharder {
    /// Build from a `INDEX/TOTAL` CLI value plus optional explicit seed.
    /// Without an explicit seed, a commit SHA exported by the CI environment
    /// (`GITHUB_SHA`, then `CIRCLE_SHA1`) is turned into one, so all workers
    /// of one build agree but different builds get different shard mixes.
    pub fn from_flag<F>(value: &str, seed: Option<i64>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some((index, total)) = parse_spec(value) else {
            bail!("shard: value must be in the form INDEX/TOTAL (e.g. 2/8)");
        };
        let seed = seed.or_else(|| seed_from_env(&env)).unwrap_or(DEFAULT_SEED);
        Self::new(index, total, seed)
    }

    pub fn new(index: usize, total: usize, seed: i64) -> Result<Self> {
        if total == 0 {
            bail!("shard: total shards must be a number greater than 0");
        }
        if index == 0 || index > total {
            bail!("shard: shard index must be > 0 and <= {total}");
        }
        Ok(Sharder { index, total, seed })
    }

    /// Select this shard's paths. Slow tests (feature, e2e, and similar
    /// directories) are shuffled as their own group after the fast ones, with
    /// one generator shared across both draws; interleaving the groups before
    /// slicing spreads slow tests across all shards instead of letting them
    /// clump on one worker.
    pub fn shard(&self, test_paths: &[String]) -> Vec<String> {
        let (mut fast, mut slow): (Vec<&str>, Vec<&str>) = test_paths
            .iter()
            .map(String::as_str)
            .partition(|path| !file_system::is_slow_test_path(path));

        let mut rng = MtRand::new(self.seed);
        rng.shuffle(&mut fast);
        rng.shuffle(&mut slow);
        fast.extend(slow);

        fast.into_iter()
            .skip(self.index - 1)
            .step_by(self.total)
            .map(str::to_owned)
            .collect()
    }
}

fn parse_spec(value: &str) -> Option<(usize, usize)> {
    let (index, total) = value.split_once('/')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if total.is_empty() || !total.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((index.parse().ok()?, total.parse().ok()?))
}

fn seed_from_env<F>(env: &F) -> Option<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let sha = ["GITHUB_SHA", "CIRCLE_SHA1"]
        .iter()
        .find_map(|key| env(key).filter(|value| !value.trim().is_empty()))?;
    seed_from_sha(&sha)
}

/// First eight bytes of the SHA string, read as a little-endian signed
/// integer. Short values yield no seed rather than an error.
fn seed_from_sha(sha: &str) -> Option<i64> {
    let bytes: [u8; 8] = sha.as_bytes().get(..8)?.try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}
