//! Splitting, partitioning, reducing and merging on disk.
//!
//! Every intermediate file name is a pure function of the input path and the
//! task indices, so re-running a task overwrites exactly the files it owns:
//!
//! - split for map task `m`: `<dir>/mrtmp.<base>-<m>`
//! - shuffle file for `(m, r)`: `<split>-<r>`
//! - reduce output for `r`: `<dir>/mrtmp.<base>-res-<r>`
//! - merged result: `<dir>/mrtmp.<base>`

use std::{
    collections::{btree_map::Entry, BTreeMap},
    ffi::OsString,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::mr::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// User map function: the whole text of one split in, records out
pub type MapFn = dyn Fn(&str) -> Vec<KeyValue> + Send + Sync;

/// User reduce function: one key and every value emitted for it
pub type ReduceFn = dyn Fn(&str, Vec<&str>) -> String + Send + Sync;

/// One MapReduce run, fixed at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub n_map: usize,
    pub n_reduce: usize,
    pub input_path: PathBuf,
}

impl Job {
    pub fn new(n_map: usize, n_reduce: usize, input_path: impl Into<PathBuf>) -> Self {
        Self {
            n_map,
            n_reduce,
            input_path: input_path.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_map == 0 {
            return Err(Error::InvalidJob("at least one map task is required".into()));
        }
        if self.n_reduce == 0 {
            return Err(Error::InvalidJob("at least one reduce task is required".into()));
        }
        if self.input_path.file_name().is_none() {
            return Err(Error::InvalidJob(format!(
                "input path {} does not name a file",
                self.input_path.display()
            )));
        }
        Ok(())
    }
}

fn input_base(input: &Path) -> String {
    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn input_dir(input: &Path) -> &Path {
    input.parent().unwrap_or_else(|| Path::new(""))
}

/// Split file read by map task `map_index`
pub fn map_name(input: &Path, map_index: usize) -> PathBuf {
    input_dir(input).join(format!("mrtmp.{}-{}", input_base(input), map_index))
}

/// File holding map task `map_index`'s records for reduce task `reduce_index`
pub fn shuffle_name(input: &Path, map_index: usize, reduce_index: usize) -> PathBuf {
    let mut name: OsString = map_name(input, map_index).into_os_string();
    name.push(format!("-{}", reduce_index));
    PathBuf::from(name)
}

pub fn reduce_output_name(input: &Path, reduce_index: usize) -> PathBuf {
    input_dir(input).join(format!("mrtmp.{}-res-{}", input_base(input), reduce_index))
}

pub fn merged_name(input: &Path) -> PathBuf {
    input_dir(input).join(format!("mrtmp.{}", input_base(input)))
}

/// 32-bit FNV-1a. Every executor must agree on this or the shuffle silently breaks.
pub fn ihash(key: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    key.bytes()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ byte as u32).wrapping_mul(PRIME))
}

/// The reduce task responsible for `key`
pub fn partition(key: &str, n_reduce: usize) -> usize {
    ihash(key) as usize % n_reduce
}

/// Output written next to its final name and renamed into place on commit,
/// so readers never observe a half-written file.
struct AtomicFile {
    path: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl AtomicFile {
    fn create(path: &Path) -> Result<Self> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir).map_err(|e| Error::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    fn write_record(&mut self, kv: &KeyValue) -> Result<()> {
        serde_json::to_writer(&mut self.writer, kv).map_err(|e| Error::io(&self.path, e.into()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| Error::io(&self.path, e))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{}", line).map_err(|e| Error::io(&self.path, e))
    }

    fn commit(self) -> Result<()> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| Error::io(&self.path, e.into_error()))?;
        file.persist(&self.path)
            .map_err(|e| Error::io(&self.path, e.error))?;
        Ok(())
    }
}

fn create_split(input: &Path, map_index: usize) -> Result<(PathBuf, BufWriter<File>)> {
    let path = map_name(input, map_index);
    let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
    Ok((path, BufWriter::new(file)))
}

fn finish_split((path, mut writer): (PathBuf, BufWriter<File>)) -> Result<()> {
    writer.flush().map_err(|e| Error::io(&path, e))
}

/// Cut the input into `n_map` split files at line boundaries, each roughly
/// `size / n_map` bytes. The last split takes whatever is left, and every
/// split file exists afterwards even when the input has fewer lines than
/// there are map tasks.
pub fn split(input: &Path, n_map: usize) -> Result<()> {
    if n_map == 0 {
        return Err(Error::InvalidJob("at least one map task is required".into()));
    }
    info!(input = %input.display(), n_map, "splitting input");
    let file = File::open(input).map_err(|e| Error::io(input, e))?;
    let size = file.metadata().map_err(|e| Error::io(input, e))?.len();
    let chunk = size / n_map as u64 + 1;

    let mut reader = BufReader::new(file);
    let mut current = create_split(input, 0)?;
    let mut map_index = 0;
    let mut written = 0u64;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| Error::io(input, e))?;
        if n == 0 {
            break;
        }
        if map_index + 1 < n_map && written >= chunk * (map_index as u64 + 1) {
            finish_split(current)?;
            map_index += 1;
            current = create_split(input, map_index)?;
        }
        current
            .1
            .write_all(&line)
            .map_err(|e| Error::io(&current.0, e))?;
        written += n as u64;
    }
    finish_split(current)?;

    for rest in map_index + 1..n_map {
        finish_split(create_split(input, rest)?)?;
    }
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<KeyValue>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if line.is_empty() {
            continue;
        }
        let kv = serde_json::from_str(&line).map_err(|source| Error::Decode {
            path: path.to_path_buf(),
            line: number + 1,
            source,
        })?;
        records.push(kv);
    }
    Ok(records)
}

/// Map one split and scatter its records over `n_reduce` shuffle files by
/// `ihash(key) % n_reduce`. All `n_reduce` files are written, empty or not.
pub fn run_map(input: &Path, map_index: usize, n_reduce: usize, map_fn: &MapFn) -> Result<()> {
    let name = map_name(input, map_index);
    let bytes = fs::read(&name).map_err(|e| Error::io(&name, e))?;
    debug!(split = %name.display(), bytes = bytes.len(), "map task read its split");

    // Invalid UTF-8 becomes U+FFFD rather than failing the task
    let contents = String::from_utf8_lossy(&bytes);
    let records = map_fn(&contents);
    let mut outputs = (0..n_reduce)
        .map(|r| AtomicFile::create(&shuffle_name(input, map_index, r)))
        .collect::<Result<Vec<_>>>()?;
    for kv in &records {
        outputs[partition(&kv.key, n_reduce)].write_record(kv)?;
    }
    for output in outputs {
        output.commit()?;
    }
    debug!(map_index, records = records.len(), "map task finished");
    Ok(())
}

/// Gather partition `reduce_index` from every map output, reduce each key
/// once, and write the results sorted by key.
pub fn run_reduce(
    input: &Path,
    reduce_index: usize,
    n_map: usize,
    reduce_fn: &ReduceFn,
) -> Result<()> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for map_index in 0..n_map {
        let name = shuffle_name(input, map_index, reduce_index);
        debug!(file = %name.display(), "reduce task reading shuffle file");
        for kv in read_records(&name)? {
            groups.entry(kv.key).or_default().push(kv.value);
        }
    }

    let mut output = AtomicFile::create(&reduce_output_name(input, reduce_index))?;
    for (key, values) in &groups {
        let value = reduce_fn(key, values.iter().map(String::as_str).collect());
        output.write_record(&KeyValue::new(key.as_str(), value))?;
    }
    output.commit()?;
    debug!(reduce_index, keys = groups.len(), "reduce task finished");
    Ok(())
}

/// Combine every reduce output into the final `key\tvalue` file and return its path.
pub fn merge(input: &Path, n_reduce: usize) -> Result<PathBuf> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for reduce_index in 0..n_reduce {
        let name = reduce_output_name(input, reduce_index);
        debug!(file = %name.display(), "merging reduce output");
        for kv in read_records(&name)? {
            match merged.entry(kv.key) {
                Entry::Vacant(slot) => {
                    slot.insert(kv.value);
                }
                Entry::Occupied(slot) => {
                    return Err(Error::DuplicateKey {
                        key: slot.key().clone(),
                        path: name,
                    });
                }
            }
        }
    }

    let result = merged_name(input);
    let mut output = AtomicFile::create(&result)?;
    for (key, value) in &merged {
        output.write_line(&format!("{}\t{}", key, value))?;
    }
    output.commit()?;
    info!(output = %result.display(), keys = merged.len(), "merge finished");
    Ok(result)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Delete every split, shuffle and reduce-output file of a job. The merged
/// result is left alone. Safe to call twice.
pub fn cleanup(job: &Job) -> Result<()> {
    let input = job.input_path.as_path();
    for map_index in 0..job.n_map {
        remove_if_present(&map_name(input, map_index))?;
        for reduce_index in 0..job.n_reduce {
            remove_if_present(&shuffle_name(input, map_index, reduce_index))?;
        }
    }
    for reduce_index in 0..job.n_reduce {
        remove_if_present(&reduce_output_name(input, reduce_index))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn word_map(contents: &str) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|w| KeyValue::new(w, "1"))
            .collect()
    }

    fn count_reduce(_key: &str, values: Vec<&str>) -> String {
        values.len().to_string()
    }

    fn write_input(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("input.txt");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn file_names_follow_the_naming_scheme() {
        let input = Path::new("/data/jobs/pg.txt");
        assert_eq!(map_name(input, 3), PathBuf::from("/data/jobs/mrtmp.pg.txt-3"));
        assert_eq!(
            shuffle_name(input, 3, 7),
            PathBuf::from("/data/jobs/mrtmp.pg.txt-3-7")
        );
        assert_eq!(
            reduce_output_name(input, 2),
            PathBuf::from("/data/jobs/mrtmp.pg.txt-res-2")
        );
        assert_eq!(merged_name(input), PathBuf::from("/data/jobs/mrtmp.pg.txt"));
        // bare file names stay relative
        assert_eq!(map_name(Path::new("pg.txt"), 0), PathBuf::from("mrtmp.pg.txt-0"));
    }

    #[test]
    fn ihash_is_fnv1a_32() {
        assert_eq!(ihash(""), 0x811c_9dc5);
        assert_eq!(ihash("a"), 0xe40c_292c);
        assert_eq!(ihash("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn partition_is_stable_and_in_range() {
        for key in ["the", "quick", "fox", "", "ünïcode"] {
            let first = partition(key, 7);
            assert!(first < 7);
            for _ in 0..5 {
                assert_eq!(partition(key, 7), first);
            }
        }
    }

    #[test]
    fn job_validation_rejects_empty_phases() {
        assert!(Job::new(1, 1, "in.txt").validate().is_ok());
        assert!(matches!(
            Job::new(0, 1, "in.txt").validate(),
            Err(Error::InvalidJob(_))
        ));
        assert!(matches!(
            Job::new(1, 0, "in.txt").validate(),
            Err(Error::InvalidJob(_))
        ));
    }

    #[test]
    fn split_keeps_lines_whole_and_reproduces_input() {
        let dir = TempDir::new().unwrap();
        let contents: String = (0..500).map(|i| format!("line number {}\n", i)).collect();
        let input = write_input(&dir, &contents);

        split(&input, 4).unwrap();

        let mut joined = String::new();
        for m in 0..4 {
            let chunk = fs::read_to_string(map_name(&input, m)).unwrap();
            assert!(!chunk.is_empty(), "split {} is empty", m);
            assert!(chunk.ends_with('\n'), "split {} ends mid-line", m);
            joined.push_str(&chunk);
        }
        assert_eq!(joined, contents);
    }

    #[test]
    fn split_without_trailing_newline_keeps_last_line() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "alpha\nbeta\ngamma");

        split(&input, 2).unwrap();

        let joined: String = (0..2)
            .map(|m| fs::read_to_string(map_name(&input, m)).unwrap())
            .collect();
        assert_eq!(joined, "alpha\nbeta\ngamma");
    }

    #[test]
    fn split_creates_every_file_for_short_inputs() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "only\n");

        split(&input, 5).unwrap();

        assert_eq!(fs::read_to_string(map_name(&input, 0)).unwrap(), "only\n");
        for m in 1..5 {
            assert_eq!(fs::read_to_string(map_name(&input, m)).unwrap(), "");
        }
    }

    #[test]
    fn split_of_missing_input_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = split(&dir.path().join("missing.txt"), 2).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn map_output_lands_in_exactly_the_right_partition() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "a b c d e f g h a b c\n");
        split(&input, 1).unwrap();

        run_map(&input, 0, 3, &word_map).unwrap();

        let mut seen = Vec::new();
        for r in 0..3 {
            for kv in read_records(&shuffle_name(&input, 0, r)).unwrap() {
                assert_eq!(partition(&kv.key, 3), r);
                seen.push(kv.key);
            }
        }
        seen.sort();
        let mut expected = word_map("a b c d e f g h a b c")
            .into_iter()
            .map(|kv| kv.key)
            .collect::<Vec<_>>();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn map_replaces_invalid_utf8_instead_of_failing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, b"hello \xff world\nfoo bar\n").unwrap();
        split(&input, 1).unwrap();

        run_map(&input, 0, 1, &word_map).unwrap();

        let keys: Vec<String> = read_records(&shuffle_name(&input, 0, 0))
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["hello", "\u{FFFD}", "world", "foo", "bar"]);
    }

    #[test]
    fn reduce_output_is_sorted_and_grouped() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "pear apple fig\napple pear apple\n");
        split(&input, 2).unwrap();
        for m in 0..2 {
            run_map(&input, m, 1, &word_map).unwrap();
        }

        run_reduce(&input, 0, 2, &count_reduce).unwrap();

        let records = read_records(&reduce_output_name(&input, 0)).unwrap();
        assert_eq!(
            records,
            vec![
                KeyValue::new("apple", "3"),
                KeyValue::new("fig", "1"),
                KeyValue::new("pear", "2"),
            ]
        );
    }

    #[test]
    fn reduce_reports_missing_shuffle_file() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "x\n");
        let err = run_reduce(&input, 0, 1, &count_reduce).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn merge_is_byte_identical_when_repeated() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "one two three two one one\n");
        split(&input, 1).unwrap();
        run_map(&input, 0, 2, &word_map).unwrap();
        for r in 0..2 {
            run_reduce(&input, r, 1, &count_reduce).unwrap();
        }

        let first = fs::read(merge(&input, 2).unwrap()).unwrap();
        let second = fs::read(merge(&input, 2).unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            String::from_utf8(first).unwrap(),
            "one\t3\nthree\t1\ntwo\t2\n"
        );
    }

    #[test]
    fn merge_refuses_a_key_seen_in_two_partitions() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "");
        for r in 0..2 {
            let line = serde_json::to_string(&KeyValue::new("dup", r.to_string())).unwrap();
            fs::write(reduce_output_name(&input, r), format!("{}\n", line)).unwrap();
        }

        match merge(&input, 2) {
            Err(Error::DuplicateKey { key, path }) => {
                assert_eq!(key, "dup");
                assert_eq!(path, reduce_output_name(&input, 1));
            }
            other => panic!("expected a duplicate key fault, got {:?}", other),
        }
    }

    #[test]
    fn cleanup_removes_intermediates_and_tolerates_repeats() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "a b\nc d\n");
        let job = Job::new(2, 2, &input);
        split(&input, 2).unwrap();
        for m in 0..2 {
            run_map(&input, m, 2, &word_map).unwrap();
        }
        for r in 0..2 {
            run_reduce(&input, r, 2, &count_reduce).unwrap();
        }
        let result = merge(&input, 2).unwrap();

        cleanup(&job).unwrap();
        cleanup(&job).unwrap();

        let left: HashSet<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(left, HashSet::from([input.clone(), result]));
    }
}
