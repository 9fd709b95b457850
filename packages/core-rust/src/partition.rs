//! Multicast partitions and multicast id construction.
//!
//! A non-selective broadcast is addressed by a multicast id of the form
//! `providerParticipantId/broadcastName[/partition...]`. Partitions narrow the
//! topic hierarchically:
//!
//! - [`SINGLE_LEVEL_WILDCARD`] (`+`) stands for exactly one partition
//! - [`MULTI_LEVEL_WILDCARD`] (`*`) stands for any remaining partitions and
//!   may only appear last
//!
//! Matching of wildcard patterns against published partitions is the
//! broker's concern; this module only validates and composes ids.

pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "*";

const MULTICAST_ID_SEPARATOR: char = '/';

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Reason a partition list was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("partition {index} ({segment:?}) must be alphanumeric, \"+\" or \"*\"")]
    InvalidSegment { index: usize, segment: String },
    #[error("multi-level wildcard \"*\" at partition {index} must be the last partition")]
    MisplacedMultiLevelWildcard { index: usize },
}

/// Validates every partition of a broadcast subscription or publication.
///
/// # Errors
///
/// Returns the first offending partition.
pub fn validate_partitions(partitions: &[String]) -> Result<(), PartitionError> {
    let last = partitions.len().saturating_sub(1);
    for (index, segment) in partitions.iter().enumerate() {
        if segment == MULTI_LEVEL_WILDCARD {
            if index != last {
                return Err(PartitionError::MisplacedMultiLevelWildcard { index });
            }
            continue;
        }
        if segment == SINGLE_LEVEL_WILDCARD || is_plain_segment(segment) {
            continue;
        }
        return Err(PartitionError::InvalidSegment {
            index,
            segment: segment.clone(),
        });
    }
    Ok(())
}

/// Builds the multicast id for a broadcast of a provider.
#[must_use]
pub fn create_multicast_id(
    provider_participant_id: &str,
    broadcast_name: &str,
    partitions: &[String],
) -> String {
    let mut id = String::with_capacity(
        provider_participant_id.len()
            + broadcast_name.len()
            + partitions.iter().map(|p| p.len() + 1).sum::<usize>()
            + 1,
    );
    id.push_str(provider_participant_id);
    id.push(MULTICAST_ID_SEPARATOR);
    id.push_str(broadcast_name);
    for partition in partitions {
        id.push(MULTICAST_ID_SEPARATOR);
        id.push_str(partition);
    }
    id
}
