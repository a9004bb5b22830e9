use crate::table::TabTable;

use influxdb_shard::Measurement;
use influxdb_tsm1::{Shard, Store};
use tracing::warn;

use std::io::{self, Write};

/// Write the store wide counters, followed by an empty comment line.
pub fn write_header(store: &Store, w: &mut impl Write) -> io::Result<()> {
    writeln!(
        w,
        "# Shards: {}, Indexes: {}, Databases: {}, Disk Size: {}, Series: {}",
        store.shard_count(),
        store.database_index_count(),
        store.databases().len(),
        store.disk_size(),
        store.series_count(),
    )?;
    writeln!(w, "#")
}

/// Write one row per measurement: the shard its fields were sampled from,
/// tag key and value counts, field names with their sampled types and the
/// number of series.
pub fn write_summary(store: &Store, w: &mut impl Write) -> io::Result<()> {
    let mut table = TabTable::new(16, 0);
    table.push_row([
        "# Shard",
        "DB",
        "Measurement",
        "Tags [#K/#V]",
        "Fields [Name:Type]",
        "Series",
    ]);

    for database in store.databases() {
        let Some(index) = store.database_index(database) else {
            continue;
        };
        let shards = store.database_shards(database);
        for measurement in index.measurements() {
            let (shard, types) = match sample(measurement, &shards) {
                Some((id, types)) => (id.to_string(), types.join(",")),
                None => ("-".to_string(), String::new()),
            };
            table.push_row([
                format!("# {shard}"),
                database.to_string(),
                measurement.name.clone(),
                format!(
                    "{}/{}",
                    measurement.tag_keys().len(),
                    measurement.tag_value_count()
                ),
                format!("{} [{types}]", measurement.field_names().len()),
                measurement.series_keys().len().to_string(),
            ]);
        }
    }

    table.write_to(w)
}

/// Decode the first readable point of `measurement`, trying series keys in
/// order and, for each, the shards in ascending id order. Returns the shard
/// sampled and the sorted `name:type` pairs of the point.
///
/// Only one point is looked at, so fields missing from it or a type that
/// changed later in the series are not reported.
fn sample(measurement: &Measurement, shards: &[&Shard]) -> Option<(u64, Vec<String>)> {
    for key in measurement.series_keys() {
        for shard in shards {
            let tx = shard.read_only_tx();
            let first = tx.cursor(key).and_then(|mut cursor| cursor.seek_first());
            tx.rollback();

            let value = match first {
                None => continue,
                Some(Ok((_, value))) => value,
                Some(Err(e)) => {
                    warn!(shard = shard.id(), key, %e, "failed to read first point");
                    continue;
                }
            };

            let mut types = match shard.field_codec(&measurement.name) {
                Some(codec) => match codec.decode_fields_with_names(&value) {
                    Ok(fields) => fields
                        .iter()
                        .map(|(name, value)| format!("{name}:{}", value.field_type()))
                        .collect::<Vec<_>>(),
                    Err(e) => {
                        warn!(shard = shard.id(), key, %e, "failed to decode values");
                        vec![]
                    }
                },
                None => vec![],
            };
            types.sort();
            return Some((shard.id(), types));
        }
    }
    None
}
