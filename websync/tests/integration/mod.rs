mod authenticated_client_test;
mod kiotviet_client_test;
mod sync_orchestrator_test;
