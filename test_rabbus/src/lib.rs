//! System tests for the `rabbus` crate live under `tests/`.
