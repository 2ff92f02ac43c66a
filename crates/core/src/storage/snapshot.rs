//! Binary snapshot codec for a built index.
//!
//! One blob per index:
//!
//! ```text
//! [magic u32][format u32][d u32][k u32][shard_count u32]
//! [centroid table: k * d f32 LE]
//! per shard: [shard_id u32][centroids_owned u32]
//!   per centroid: [centroid_idx u32][len u64][len i64 ids LE][len * d f32 LE]
//! [crc32 u32 over everything above]
//! ```
//!
//! Every magic/format/size/checksum failure decodes to
//! [`IndexError::Corrupt`]; blobs are never auto-repaired.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::clustering::Centroids;
use crate::error::IndexError;
use crate::ivf::coordinator::DistributedIvf;
use crate::ivf::posting::InvertedList;
use crate::ivf::shard::IvfShard;

const SNAPSHOT_MAGIC: u32 = u32::from_le_bytes(*b"IVF1");
const SNAPSHOT_FORMAT: u32 = 1;

/// Serialize a trained index to a self-contained blob.
///
/// Requires every shard to be local; remote handles have no postings to
/// write.
pub fn encode_index(index: &DistributedIvf) -> Result<Vec<u8>, IndexError> {
    let Some(centroids) = index.centroids() else {
        return Err(IndexError::InvalidState(
            "cannot snapshot an untrained index".into(),
        ));
    };

    let mut buf: Vec<u8> = Vec::new();
    // Writes into a Vec cannot fail; unwraps here are infallible.
    buf.write_u32::<LittleEndian>(SNAPSHOT_MAGIC).unwrap();
    buf.write_u32::<LittleEndian>(SNAPSHOT_FORMAT).unwrap();
    buf.write_u32::<LittleEndian>(index.dimension() as u32).unwrap();
    buf.write_u32::<LittleEndian>(centroids.len() as u32).unwrap();
    buf.write_u32::<LittleEndian>(index.shard_count()).unwrap();

    for &val in centroids.data() {
        buf.write_f32::<LittleEndian>(val).unwrap();
    }

    for shard_id in 0..index.shard_count() {
        let shard = index
            .shard(shard_id)
            .and_then(|handle| handle.as_local())
            .ok_or_else(|| {
                IndexError::InvalidState(format!(
                    "cannot snapshot remote shard {shard_id}"
                ))
            })?;

        // Deterministic blob: lists are written in centroid order.
        let mut owned: Vec<(u32, &InvertedList)> = shard.postings().collect();
        owned.sort_unstable_by_key(|(centroid, _)| *centroid);

        buf.write_u32::<LittleEndian>(shard_id).unwrap();
        buf.write_u32::<LittleEndian>(owned.len() as u32).unwrap();
        for (centroid, list) in owned {
            buf.write_u32::<LittleEndian>(centroid).unwrap();
            buf.write_u64::<LittleEndian>(list.len() as u64).unwrap();
            for &id in list.ids() {
                buf.write_i64::<LittleEndian>(id).unwrap();
            }
            for &val in list.vectors() {
                buf.write_f32::<LittleEndian>(val).unwrap();
            }
        }
    }

    let crc = crc32fast::hash(&buf);
    buf.write_u32::<LittleEndian>(crc).unwrap();
    Ok(buf)
}

fn corrupt(msg: impl Into<String>) -> IndexError {
    IndexError::Corrupt(msg.into())
}

/// Rebuild an index from a snapshot blob.
///
/// The blob carries no topology, so the caller supplies the index name and
/// the node list; shard-to-node placement is re-derived from the stable
/// round-robin rule.
pub fn decode_index(
    name: &str,
    nodes: Vec<String>,
    bytes: &[u8],
) -> Result<DistributedIvf, IndexError> {
    if bytes.len() < 24 {
        return Err(corrupt("snapshot shorter than header"));
    }
    if nodes.is_empty() {
        return Err(IndexError::InvalidArgument(
            "at least one node is required".into(),
        ));
    }

    // Checksum covers everything before the 4-byte footer.
    let payload = &bytes[..bytes.len() - 4];
    let stored_crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(corrupt(format!(
            "CRC32 mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let mut cursor = Cursor::new(payload);
    let read_err = |_: std::io::Error| corrupt("snapshot truncated");

    let magic = cursor.read_u32::<LittleEndian>().map_err(read_err)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(corrupt(format!("bad magic {magic:#010x}")));
    }
    let format = cursor.read_u32::<LittleEndian>().map_err(read_err)?;
    if format != SNAPSHOT_FORMAT {
        return Err(corrupt(format!("unsupported format version {format}")));
    }

    let dim = cursor.read_u32::<LittleEndian>().map_err(read_err)? as usize;
    let k = cursor.read_u32::<LittleEndian>().map_err(read_err)? as usize;
    let shard_count = cursor.read_u32::<LittleEndian>().map_err(read_err)?;
    if dim == 0 || k == 0 || shard_count == 0 {
        return Err(corrupt("zero dimension, centroid count, or shard count"));
    }

    let mut centroid_data = vec![0.0f32; k * dim];
    for val in &mut centroid_data {
        *val = cursor.read_f32::<LittleEndian>().map_err(read_err)?;
    }
    let centroids = Centroids::from_flat(dim, centroid_data);

    let mut shards = Vec::with_capacity(shard_count as usize);
    for expected_id in 0..shard_count {
        let shard_id = cursor.read_u32::<LittleEndian>().map_err(read_err)?;
        if shard_id != expected_id {
            return Err(corrupt(format!(
                "shard records out of order: expected {expected_id}, found {shard_id}"
            )));
        }
        let node = nodes[shard_id as usize % nodes.len()].clone();
        let mut shard = IvfShard::new(shard_id, node, dim);

        let owned = cursor.read_u32::<LittleEndian>().map_err(read_err)?;
        for _ in 0..owned {
            let centroid = cursor.read_u32::<LittleEndian>().map_err(read_err)?;
            if centroid as usize >= k {
                return Err(corrupt(format!("centroid index {centroid} out of range")));
            }
            if centroid % shard_count != shard_id {
                return Err(corrupt(format!(
                    "centroid {centroid} does not belong to shard {shard_id}"
                )));
            }
            let len = cursor.read_u64::<LittleEndian>().map_err(read_err)? as usize;

            let mut ids = Vec::with_capacity(len);
            for _ in 0..len {
                ids.push(cursor.read_i64::<LittleEndian>().map_err(read_err)?);
            }
            let mut list = InvertedList::with_capacity(dim, len);
            let mut vector = vec![0.0f32; dim];
            for &id in &ids {
                for val in &mut vector {
                    *val = cursor.read_f32::<LittleEndian>().map_err(read_err)?;
                }
                list.append(id, &vector);
            }
            shard.add_posting(centroid, list);
        }
        shards.push(shard);
    }

    if cursor.position() as usize != payload.len() {
        return Err(corrupt("trailing bytes after shard records"));
    }

    Ok(DistributedIvf::restore(
        name.to_string(),
        dim,
        k,
        shard_count,
        nodes,
        centroids,
        shards,
        1,
    ))
}
