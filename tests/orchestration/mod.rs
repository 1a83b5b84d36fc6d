mod base_orchestrator_test;
mod workflow_pipeline_test;
