//! End-to-end scenarios for the petition workspace live in `tests/`.
