//! End-to-end pipeline scenarios over the two-node harness.
