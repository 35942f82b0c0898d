// Core modules: dump decoding, statement scanning, value tokenizing, and error modeling.
pub mod encoding;
pub mod error;
pub mod extract;
pub mod scalar;
pub mod scanner;
pub mod tokenizer;
