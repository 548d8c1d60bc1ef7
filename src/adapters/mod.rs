pub mod llm;
pub mod sqlite;
