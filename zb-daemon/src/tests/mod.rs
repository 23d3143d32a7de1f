mod build_derivation;
