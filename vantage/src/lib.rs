pub mod handlers;

// Re-export commonly used handler helpers for convenience
pub use handlers::{
    expand_context, load_config, load_subnet_file, parse_edge_ref, render_elements,
    render_status, resolve_path,
};
