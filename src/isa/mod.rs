//! Instruction set: opcode tables and the encoder.
//!
//! Recognition walks four ordered lookups (bit-test, Q register, long
//! branch, then implied / short branch / general), each gated by the
//! active CPU variant. The encoder infers the address mode from the
//! operand syntax, evaluates the operand, applies base-page shortening
//! and synthesizes the 45GS02 instruction prefixes.

pub mod encode;
pub mod tables;

pub use encode::{encode, is_instruction, Encoded, EncodeRequest};
pub use tables::{BranchOp, GenOp, ImpliedOp, Op};
