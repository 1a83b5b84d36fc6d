mod app_progression_test;
