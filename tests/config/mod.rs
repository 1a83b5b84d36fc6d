mod loading_test;
