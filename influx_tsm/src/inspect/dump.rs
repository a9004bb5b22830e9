use influxdb_tsm1::{Shard, Store};
use tracing::{debug, warn};

use std::io::{self, BufWriter, Write};

/// Size of the buffer the dump is written through.
pub const DUMP_BUFFER_SIZE: usize = 32_000_000;

/// Counts of what a dump wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub points: u64,
    /// Points skipped because they could not be read or decoded.
    pub skipped: u64,
}

/// Write every point in the store as line protocol.
///
/// Points are ordered by database, measurement and series key, then by shard
/// id, then in storage order. Each database opens with a context line, and a
/// retention policy context line precedes the first point of each run of
/// shards sharing a retention policy.
pub fn write_dump(store: &Store, w: &mut impl Write) -> io::Result<DumpStats> {
    let mut w = BufWriter::with_capacity(DUMP_BUFFER_SIZE, w);
    let mut stats = DumpStats::default();

    writeln!(w, "# DML")?;
    for database in store.databases() {
        writeln!(w, "# CONTEXT-DATABASE:{database}")?;
        let Some(index) = store.database_index(database) else {
            continue;
        };
        let shards = store.database_shards(database);
        let mut retention_policy = None;

        for measurement in index.measurements() {
            for key in measurement.series_keys() {
                for shard in shards.iter().copied() {
                    dump_series(
                        shard,
                        &measurement.name,
                        key,
                        &mut retention_policy,
                        &mut w,
                        &mut stats,
                    )?;
                }
            }
        }
    }

    w.flush()?;
    debug!(points = stats.points, skipped = stats.skipped, "dump complete");
    Ok(stats)
}

fn dump_series<'a>(
    shard: &'a Shard,
    measurement: &str,
    key: &str,
    retention_policy: &mut Option<&'a str>,
    w: &mut impl Write,
    stats: &mut DumpStats,
) -> io::Result<()> {
    let tx = shard.read_only_tx();
    let Some(cursor) = tx.cursor(key) else {
        return Ok(());
    };
    let Some(codec) = shard.field_codec(measurement) else {
        warn!(shard = shard.id(), measurement, "no field definitions, skipping series");
        tx.rollback();
        return Ok(());
    };

    if *retention_policy != Some(shard.retention_policy()) {
        writeln!(w, "# CONTEXT-RETENTION-POLICY:{}", shard.retention_policy())?;
        *retention_policy = Some(shard.retention_policy());
    }

    for point in cursor {
        let (timestamp, value) = match point {
            Ok(point) => point,
            Err(e) => {
                warn!(shard = shard.id(), key, %e, "failed to read series");
                stats.skipped += 1;
                break;
            }
        };
        let fields = match codec.decode_fields_with_names(&value) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(shard = shard.id(), key, timestamp, %e, "failed to decode values");
                stats.skipped += 1;
                continue;
            }
        };

        write!(w, "{key} ")?;
        for (i, (name, value)) in fields.iter().enumerate() {
            if i > 0 {
                w.write_all(b",")?;
            }
            write!(w, "{name}={value}")?;
        }
        writeln!(w, " {timestamp}")?;
        stats.points += 1;
    }

    tx.rollback();
    Ok(())
}
