pub mod ctr_encryptor;
