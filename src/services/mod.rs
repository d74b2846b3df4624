pub mod llm;
pub mod relay;
pub mod store;
pub mod supabase;
