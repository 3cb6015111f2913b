use crate::scan::ScanOrchestrator;

/// Process-wide handles, constructed once in `main` and passed to every
/// handler through axum state. Nothing here is reachable through globals.
pub struct AppState {
    pub scans: ScanOrchestrator,
}
