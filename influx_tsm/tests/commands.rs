use assert_cmd::Command;
use influx_tsm::inspect::{Mode, report};
use influxdb_shard::{EngineFormat, discover};
use influxdb_tsm1::Store;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use tsm_test_helpers::{ShardFixture, sample_shard, tmp_dir};

use std::fs;
use std::io::Read;
use std::path::Path;

fn influx_tsm() -> Command {
    let mut cmd = Command::cargo_bin("influx_tsm").unwrap();
    cmd.env("LOG_FILTER", "warn");
    cmd
}

fn convert(data: &Path) -> Command {
    let mut cmd = influx_tsm();
    cmd.arg("convert").arg(data);
    cmd
}

/// Write the sample shard as shard `id` of `database`, returning its bytes.
fn legacy_shard(data: &Path, database: &str, id: u64, format: EngineFormat) -> Vec<u8> {
    let path = sample_shard(format, id as i64 * 1_000)
        .write_at(data, database, "autogen", &id.to_string())
        .unwrap();
    fs::read(path).unwrap()
}

fn formats(data: &Path) -> Vec<(String, String, EngineFormat)> {
    discover(data)
        .unwrap()
        .iter()
        .map(|s| (s.database.clone(), s.path.clone(), s.format))
        .collect()
}

#[test]
fn convert_backs_up_and_converts() {
    let dir = tmp_dir().unwrap();
    let data = dir.path();
    let shard_one = legacy_shard(data, "d1", 1, EngineFormat::B1);
    legacy_shard(data, "d1", 2, EngineFormat::Bz1);

    convert(data)
        .arg("-y")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database\tRetention\tPath"))
        .stdout(predicate::str::contains("Conversion starting...."))
        .stdout(predicate::str::contains("Database d1 backed up."))
        .stdout(
            predicate::str::contains(format!(
                "Conversion of {} successful (",
                data.join("d1/autogen/1").display()
            ))
            .and(predicate::str::contains("d1/autogen/2 successful (")),
        );

    // the backup is a copy of the database as it was
    assert_eq!(fs::read(data.join("d1.bak/autogen/1")).unwrap(), shard_one);
    assert!(data.join("d1.bak/autogen/2").is_file());

    assert_eq!(
        formats(data),
        vec![
            ("d1".to_string(), "1".to_string(), EngineFormat::Tsm1),
            ("d1".to_string(), "2".to_string(), EngineFormat::Tsm1),
        ]
    );
    assert!(!data.join("d1/autogen/1.tsm").exists());

    let store = Store::open(data).unwrap();
    assert_eq!(store.shard(1).unwrap().series_count(), 3);
    assert_eq!(store.shard(2).unwrap().series_count(), 3);
    let stats = report(&store, Mode::Dump, &mut std::io::sink()).unwrap();
    assert_eq!(stats.points, 18);
    assert_eq!(stats.skipped, 0);

    // everything is converted now
    convert(data)
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do."));
}

#[test]
fn convert_in_parallel() {
    let dir = tmp_dir().unwrap();
    let data = dir.path();
    for id in 1..=3 {
        legacy_shard(data, "d1", id, EngineFormat::Bz1);
    }
    legacy_shard(data, "d2", 4, EngineFormat::B1);

    convert(data)
        .args(["--parallel", "-y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Database d1 backed up."))
        .stdout(predicate::str::contains("Database d2 backed up."));

    assert!(
        formats(data)
            .iter()
            .all(|(_, _, format)| *format == EngineFormat::Tsm1)
    );
    assert_eq!(Store::open(data).unwrap().series_count(), 12);
}

#[test]
fn convert_selected_databases_only() {
    let dir = tmp_dir().unwrap();
    let data = dir.path();
    legacy_shard(data, "d1", 1, EngineFormat::B1);
    let other = legacy_shard(data, "d2", 2, EngineFormat::B1);

    convert(data).args(["--dbs", "d1", "-y"]).assert().success();

    assert!(data.join("d1.bak").is_dir());
    assert!(!data.join("d2.bak").exists());
    assert_eq!(fs::read(data.join("d2/autogen/2")).unwrap(), other);
}

#[test]
fn declined_prompt_changes_nothing() {
    let dir = tmp_dir().unwrap();
    let data = dir.path();
    let original = legacy_shard(data, "d1", 1, EngineFormat::B1);

    convert(data)
        .write_stdin("n\n")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains(
            "These shards will be converted. Proceed? y/N: ",
        ))
        .stdout(predicate::str::contains("Conversion aborted."));

    assert!(!data.join("d1.bak").exists());
    assert_eq!(fs::read(data.join("d1/autogen/1")).unwrap(), original);

    // answering y proceeds
    convert(data).write_stdin("y\n").assert().success();
    assert!(data.join("d1.bak").is_dir());
}

#[test]
fn existing_backup_is_refused() {
    let dir = tmp_dir().unwrap();
    let data = dir.path();
    legacy_shard(data, "d1", 1, EngineFormat::B1);
    fs::create_dir_all(data.join("d1.bak/autogen")).unwrap();
    fs::write(data.join("d1.bak/autogen/old"), b"previous backup").unwrap();
    let original = fs::read(data.join("d1/autogen/1")).unwrap();

    convert(data)
        .arg("-y")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Convert command failed:"))
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(
        fs::read(data.join("d1.bak/autogen/old")).unwrap(),
        b"previous backup"
    );
    assert_eq!(fs::read(data.join("d1/autogen/1")).unwrap(), original);
}

#[test]
fn backup_directories_are_never_converted() {
    let dir = tmp_dir().unwrap();
    let data = dir.path();
    let backup = legacy_shard(data, "mydb.bak", 1, EngineFormat::B1);

    convert(data)
        .arg("-y")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do."));
    assert_eq!(fs::read(data.join("mydb.bak/autogen/1")).unwrap(), backup);

    legacy_shard(data, "mydb", 2, EngineFormat::B1);
    convert(data)
        .arg("-y")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn empty_data_directory_is_nothing_to_do() {
    let dir = tmp_dir().unwrap();

    convert(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do."));
}

#[test]
fn missing_data_directory_is_an_error() {
    let dir = tmp_dir().unwrap();

    convert(&dir.path().join("missing"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to access data directory"));
}

#[test]
fn invalid_file_size_is_rejected() {
    let dir = tmp_dir().unwrap();
    legacy_shard(dir.path(), "d1", 1, EngineFormat::B1);

    convert(dir.path())
        .args(["--sz", "0", "-y"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "TSM file size must be greater than zero",
        ));

    convert(dir.path())
        .args(["--sz", "2147483648", "-y"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("maximum TSM file size is 1073741824"));

    assert!(!dir.path().join("d1.bak").exists());
}

/// Convert the sample shards of `d1` and `d2` under `data`.
fn converted_store(data: &Path) {
    legacy_shard(data, "d1", 1, EngineFormat::B1);
    legacy_shard(data, "d1", 2, EngineFormat::Bz1);
    legacy_shard(data, "d2", 3, EngineFormat::B1);
    convert(data).arg("-y").assert().success();
}

#[test]
fn inspect_dumps_every_point() {
    let dir = tmp_dir().unwrap();
    let data = dir.path().join("data");
    converted_store(&data);

    let output = influx_tsm()
        .args(["inspect", "--mode", "dump", "-p"])
        .arg(&data)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();

    assert!(stdout.starts_with("# Shards: 3, Indexes: 2, Databases: 2, "));
    assert!(stdout.contains("# DML\n# CONTEXT-DATABASE:d1\n# CONTEXT-RETENTION-POLICY:autogen\n"));
    assert!(stdout.contains("# CONTEXT-DATABASE:d2\n"));
    assert!(!stdout.contains("# Shard\t"));

    let d1: Vec<_> = stdout
        .split("# CONTEXT-DATABASE:d2")
        .next()
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#'))
        .collect();
    for key in ["cpu,host=a,region=x", "cpu,host=b,region=y", "mem,host=a"] {
        let timestamps: Vec<i64> = d1
            .iter()
            .filter(|l| l.starts_with(&format!("{key} ")))
            .map(|l| l.rsplit(' ').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(timestamps, vec![1000, 1010, 1020, 2000, 2010, 2020], "{key}");
    }
    assert_eq!(
        stdout.lines().filter(|l| !l.starts_with('#')).count(),
        27
    );
}

#[test]
fn inspect_summarizes_measurements() {
    let dir = tmp_dir().unwrap();
    let data = dir.path().join("data");
    converted_store(&data);

    influx_tsm()
        .args(["inspect", "--mode", "summary", "--data-dir"])
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("Tags [#K/#V]"))
        .stdout(predicate::str::contains("2/4"))
        .stdout(predicate::str::contains("1 [value:float]"))
        .stdout(predicate::str::contains(
            "2 [free:integer,swapping:boolean]",
        ))
        .stdout(predicate::str::contains("# DML").not());
}

#[test]
fn inspect_writes_gzip_file() {
    let dir = tmp_dir().unwrap();
    let data = dir.path().join("data");
    converted_store(&data);
    let out = dir.path().join("dump.lp.gz");

    influx_tsm()
        .args(["inspect", "-p"])
        .arg(&data)
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let mut text = String::new();
    flate2::read::GzDecoder::new(fs::File::open(&out).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    assert!(text.contains("# Shard\t"));
    assert!(text.contains("# DML"));
    assert!(text.contains("mem,host=a free=98,swapping=true 3020"));
}

#[test]
fn inspect_skips_legacy_shards() {
    let dir = tmp_dir().unwrap();
    let data = dir.path();
    ShardFixture::new(EngineFormat::B1)
        .write_at(data, "d1", "autogen", "1")
        .unwrap();

    influx_tsm()
        .args(["inspect", "-p"])
        .arg(data)
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "# Shards: 0, Indexes: 0, Databases: 0, Disk Size: 0, Series: 0\n#\n",
        ));
}

#[test]
fn inspect_rejects_unknown_mode() {
    let dir = tmp_dir().unwrap();

    influx_tsm()
        .args(["inspect", "--mode", "everything", "-p"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Invalid mode 'everything'. Valid options: summary, dump, all",
        ));
}
