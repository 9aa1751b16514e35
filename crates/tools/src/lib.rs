//! DAW tool catalog and the tools answered in-process.
//!
//! Every tool is declared in [`catalog`]. Most of them are executed by the
//! host application; [`session_state`] and [`library`] resolve their calls
//! locally from cached data.

pub mod catalog;
pub mod library;
pub mod session_state;

use std::sync::Arc;

use dawpilot_core::tool::LocalTool;

pub use catalog::{GET_SESSION_STATE, SEARCH_LIBRARY, default_registry};
pub use library::{LibraryIndex, LibraryItem, SearchLibraryTool};
pub use session_state::SessionStateTool;

/// The in-process handlers, in lookup order.
pub fn local_tools(
    session: Arc<SessionStateTool>,
    library: Arc<LibraryIndex>,
) -> Vec<Arc<dyn LocalTool>> {
    let search: Arc<dyn LocalTool> = Arc::new(SearchLibraryTool::new(library));
    let session: Arc<dyn LocalTool> = session;
    vec![session, search]
}

#[cfg(test)]
mod tests {
    use super::*;
    use dawpilot_core::session::{ContextDepth, SessionStore};

    #[test]
    fn local_tools_are_in_catalog() {
        let registry = default_registry();
        let session = Arc::new(SessionStateTool::new(
            Arc::new(SessionStore::new()),
            ContextDepth::Standard,
        ));
        let tools = local_tools(session, Arc::new(LibraryIndex::with_builtin()));
        assert_eq!(tools.len(), 2);
        for tool in &tools {
            assert!(registry.contains(tool.name()), "{}", tool.name());
            assert!(!registry.is_destructive(tool.name()));
        }
    }
}
