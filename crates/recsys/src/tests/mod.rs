mod prediction_test;
