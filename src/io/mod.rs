//! Thin readers/writers for the external text formats named in
//! `spec.md §6`. These are explicitly out of the core's scope as a
//! production parser (no FASTA/BED, no CLI plumbing), but *some* concrete
//! reader is needed to hand sites, rate maps, and serialized ARGs to the
//! core in tests and in any real driver built on top of it.

pub mod rate_map;
pub mod sites;
pub mod smc;
