// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Inverse transforms: DCT and ADST up to 32x32 and the lossless Walsh-Hadamard transform.

use crate::decoders::vp9::types::TxSize;
use crate::decoders::vp9::types::TxType;

const COSPI_1_64: i64 = 16364;
const COSPI_2_64: i64 = 16305;
const COSPI_3_64: i64 = 16207;
const COSPI_4_64: i64 = 16069;
const COSPI_5_64: i64 = 15893;
const COSPI_6_64: i64 = 15679;
const COSPI_7_64: i64 = 15426;
const COSPI_8_64: i64 = 15137;
const COSPI_9_64: i64 = 14811;
const COSPI_10_64: i64 = 14449;
const COSPI_11_64: i64 = 14053;
const COSPI_12_64: i64 = 13623;
const COSPI_13_64: i64 = 13160;
const COSPI_14_64: i64 = 12665;
const COSPI_15_64: i64 = 12140;
const COSPI_16_64: i64 = 11585;
const COSPI_17_64: i64 = 11003;
const COSPI_18_64: i64 = 10394;
const COSPI_19_64: i64 = 9760;
const COSPI_20_64: i64 = 9102;
const COSPI_21_64: i64 = 8423;
const COSPI_22_64: i64 = 7723;
const COSPI_23_64: i64 = 7005;
const COSPI_24_64: i64 = 6270;
const COSPI_25_64: i64 = 5520;
const COSPI_26_64: i64 = 4756;
const COSPI_27_64: i64 = 3981;
const COSPI_28_64: i64 = 3196;
const COSPI_29_64: i64 = 2404;
const COSPI_30_64: i64 = 1606;
const COSPI_31_64: i64 = 804;

const SINPI_1_9: i64 = 5283;
const SINPI_2_9: i64 = 9929;
const SINPI_3_9: i64 = 13377;
const SINPI_4_9: i64 = 15212;

const DCT_CONST_BITS: u32 = 14;
const UNIT_QUANT_SHIFT: u32 = 2;

#[inline(always)]
fn round_shift(x: i64) -> i64 {
    (x + (1 << (DCT_CONST_BITS - 1))) >> DCT_CONST_BITS
}

/// Rotates `(a, b)` by the angle whose cosine and sine are `c` and `s`, returning
/// `(a * c - b * s, a * s + b * c)`.
#[inline(always)]
fn rotate(a: i64, b: i64, c: i64, s: i64) -> (i64, i64) {
    (round_shift(a * c - b * s), round_shift(a * s + b * c))
}

fn idct4(input: &[i64], output: &mut [i64]) {
    let s0 = round_shift((input[0] + input[2]) * COSPI_16_64);
    let s1 = round_shift((input[0] - input[2]) * COSPI_16_64);
    let (s2, s3) = rotate(input[1], input[3], COSPI_24_64, COSPI_8_64);

    output[0] = s0 + s3;
    output[1] = s1 + s2;
    output[2] = s1 - s2;
    output[3] = s0 - s3;
}

fn iadst4(input: &[i64], output: &mut [i64]) {
    let (x0, x1, x2, x3) = (input[0], input[1], input[2], input[3]);

    if x0 | x1 | x2 | x3 == 0 {
        output[..4].fill(0);
        return;
    }

    let s0 = SINPI_1_9 * x0 + SINPI_4_9 * x2 + SINPI_2_9 * x3;
    let s1 = SINPI_2_9 * x0 - SINPI_1_9 * x2 - SINPI_4_9 * x3;
    let s2 = SINPI_3_9 * (x0 - x2 + x3);
    let s3 = SINPI_3_9 * x1;

    output[0] = round_shift(s0 + s3);
    output[1] = round_shift(s1 + s3);
    output[2] = round_shift(s2);
    output[3] = round_shift(s0 + s1 - s3);
}

fn idct8(input: &[i64], output: &mut [i64]) {
    let even_in = [input[0], input[2], input[4], input[6]];
    let mut even = [0; 4];
    idct4(&even_in, &mut even);

    let (s4, s7) = rotate(input[1], input[7], COSPI_28_64, COSPI_4_64);
    let (s5, s6) = rotate(input[5], input[3], COSPI_12_64, COSPI_20_64);

    let t4 = s4 + s5;
    let t5 = s4 - s5;
    let t6 = -s6 + s7;
    let t7 = s6 + s7;

    let u5 = round_shift((t6 - t5) * COSPI_16_64);
    let u6 = round_shift((t5 + t6) * COSPI_16_64);

    output[0] = even[0] + t7;
    output[1] = even[1] + u6;
    output[2] = even[2] + u5;
    output[3] = even[3] + t4;
    output[4] = even[3] - t4;
    output[5] = even[2] - u5;
    output[6] = even[1] - u6;
    output[7] = even[0] - t7;
}

fn iadst8(input: &[i64], output: &mut [i64]) {
    let x0 = input[7];
    let x1 = input[0];
    let x2 = input[5];
    let x3 = input[2];
    let x4 = input[3];
    let x5 = input[4];
    let x6 = input[1];
    let x7 = input[6];

    if x0 | x1 | x2 | x3 | x4 | x5 | x6 | x7 == 0 {
        output[..8].fill(0);
        return;
    }

    // stage 1
    let s0 = COSPI_2_64 * x0 + COSPI_30_64 * x1;
    let s1 = COSPI_30_64 * x0 - COSPI_2_64 * x1;
    let s2 = COSPI_10_64 * x2 + COSPI_22_64 * x3;
    let s3 = COSPI_22_64 * x2 - COSPI_10_64 * x3;
    let s4 = COSPI_18_64 * x4 + COSPI_14_64 * x5;
    let s5 = COSPI_14_64 * x4 - COSPI_18_64 * x5;
    let s6 = COSPI_26_64 * x6 + COSPI_6_64 * x7;
    let s7 = COSPI_6_64 * x6 - COSPI_26_64 * x7;

    let x0 = round_shift(s0 + s4);
    let x1 = round_shift(s1 + s5);
    let x2 = round_shift(s2 + s6);
    let x3 = round_shift(s3 + s7);
    let x4 = round_shift(s0 - s4);
    let x5 = round_shift(s1 - s5);
    let x6 = round_shift(s2 - s6);
    let x7 = round_shift(s3 - s7);

    // stage 2
    let s4 = COSPI_8_64 * x4 + COSPI_24_64 * x5;
    let s5 = COSPI_24_64 * x4 - COSPI_8_64 * x5;
    let s6 = -COSPI_24_64 * x6 + COSPI_8_64 * x7;
    let s7 = COSPI_8_64 * x6 + COSPI_24_64 * x7;

    let y0 = x0 + x2;
    let y1 = x1 + x3;
    let y2 = x0 - x2;
    let y3 = x1 - x3;
    let y4 = round_shift(s4 + s6);
    let y5 = round_shift(s5 + s7);
    let y6 = round_shift(s4 - s6);
    let y7 = round_shift(s5 - s7);

    // stage 3
    let z2 = round_shift(COSPI_16_64 * (y2 + y3));
    let z3 = round_shift(COSPI_16_64 * (y2 - y3));
    let z6 = round_shift(COSPI_16_64 * (y6 + y7));
    let z7 = round_shift(COSPI_16_64 * (y6 - y7));

    output[0] = y0;
    output[1] = -y4;
    output[2] = z6;
    output[3] = -z2;
    output[4] = z3;
    output[5] = -z7;
    output[6] = y5;
    output[7] = -y1;
}

fn idct16(input: &[i64], output: &mut [i64]) {
    let mut even_in = [0; 8];
    for (i, v) in even_in.iter_mut().enumerate() {
        *v = input[2 * i];
    }
    let mut even = [0; 8];
    idct8(&even_in, &mut even);

    // stage 2
    let (s8, s15) = rotate(input[1], input[15], COSPI_30_64, COSPI_2_64);
    let (s9, s14) = rotate(input[9], input[7], COSPI_14_64, COSPI_18_64);
    let (s10, s13) = rotate(input[5], input[11], COSPI_22_64, COSPI_10_64);
    let (s11, s12) = rotate(input[13], input[3], COSPI_6_64, COSPI_26_64);

    // stage 3
    let t8 = s8 + s9;
    let t9 = s8 - s9;
    let t10 = -s10 + s11;
    let t11 = s10 + s11;
    let t12 = s12 + s13;
    let t13 = s12 - s13;
    let t14 = -s14 + s15;
    let t15 = s14 + s15;

    // stage 4
    let u9 = round_shift(-t9 * COSPI_8_64 + t14 * COSPI_24_64);
    let u14 = round_shift(t9 * COSPI_24_64 + t14 * COSPI_8_64);
    let u10 = round_shift(-t10 * COSPI_24_64 - t13 * COSPI_8_64);
    let u13 = round_shift(-t10 * COSPI_8_64 + t13 * COSPI_24_64);

    // stage 5
    let v8 = t8 + t11;
    let v9 = u9 + u10;
    let v10 = u9 - u10;
    let v11 = t8 - t11;
    let v12 = -t12 + t15;
    let v13 = -u13 + u14;
    let v14 = u13 + u14;
    let v15 = t12 + t15;

    // stage 6
    let w10 = round_shift((-v10 + v13) * COSPI_16_64);
    let w13 = round_shift((v10 + v13) * COSPI_16_64);
    let w11 = round_shift((-v11 + v12) * COSPI_16_64);
    let w12 = round_shift((v11 + v12) * COSPI_16_64);

    let odd = [v8, v9, w10, w11, w12, w13, v14, v15];

    for i in 0..8 {
        output[i] = even[i] + odd[7 - i];
        output[15 - i] = even[i] - odd[7 - i];
    }
}

fn iadst16(input: &[i64], output: &mut [i64]) {
    let x0 = input[15];
    let x1 = input[0];
    let x2 = input[13];
    let x3 = input[2];
    let x4 = input[11];
    let x5 = input[4];
    let x6 = input[9];
    let x7 = input[6];
    let x8 = input[7];
    let x9 = input[8];
    let x10 = input[5];
    let x11 = input[10];
    let x12 = input[3];
    let x13 = input[12];
    let x14 = input[1];
    let x15 = input[14];

    if input[..16].iter().all(|x| *x == 0) {
        output[..16].fill(0);
        return;
    }

    // stage 1
    let s0 = x0 * COSPI_1_64 + x1 * COSPI_31_64;
    let s1 = x0 * COSPI_31_64 - x1 * COSPI_1_64;
    let s2 = x2 * COSPI_5_64 + x3 * COSPI_27_64;
    let s3 = x2 * COSPI_27_64 - x3 * COSPI_5_64;
    let s4 = x4 * COSPI_9_64 + x5 * COSPI_23_64;
    let s5 = x4 * COSPI_23_64 - x5 * COSPI_9_64;
    let s6 = x6 * COSPI_13_64 + x7 * COSPI_19_64;
    let s7 = x6 * COSPI_19_64 - x7 * COSPI_13_64;
    let s8 = x8 * COSPI_17_64 + x9 * COSPI_15_64;
    let s9 = x8 * COSPI_15_64 - x9 * COSPI_17_64;
    let s10 = x10 * COSPI_21_64 + x11 * COSPI_11_64;
    let s11 = x10 * COSPI_11_64 - x11 * COSPI_21_64;
    let s12 = x12 * COSPI_25_64 + x13 * COSPI_7_64;
    let s13 = x12 * COSPI_7_64 - x13 * COSPI_25_64;
    let s14 = x14 * COSPI_29_64 + x15 * COSPI_3_64;
    let s15 = x14 * COSPI_3_64 - x15 * COSPI_29_64;

    let x0 = round_shift(s0 + s8);
    let x1 = round_shift(s1 + s9);
    let x2 = round_shift(s2 + s10);
    let x3 = round_shift(s3 + s11);
    let x4 = round_shift(s4 + s12);
    let x5 = round_shift(s5 + s13);
    let x6 = round_shift(s6 + s14);
    let x7 = round_shift(s7 + s15);
    let x8 = round_shift(s0 - s8);
    let x9 = round_shift(s1 - s9);
    let x10 = round_shift(s2 - s10);
    let x11 = round_shift(s3 - s11);
    let x12 = round_shift(s4 - s12);
    let x13 = round_shift(s5 - s13);
    let x14 = round_shift(s6 - s14);
    let x15 = round_shift(s7 - s15);

    // stage 2
    let s8 = x8 * COSPI_4_64 + x9 * COSPI_28_64;
    let s9 = x8 * COSPI_28_64 - x9 * COSPI_4_64;
    let s10 = x10 * COSPI_20_64 + x11 * COSPI_12_64;
    let s11 = x10 * COSPI_12_64 - x11 * COSPI_20_64;
    let s12 = -x12 * COSPI_28_64 + x13 * COSPI_4_64;
    let s13 = x12 * COSPI_4_64 + x13 * COSPI_28_64;
    let s14 = -x14 * COSPI_12_64 + x15 * COSPI_20_64;
    let s15 = x14 * COSPI_20_64 + x15 * COSPI_12_64;

    let y0 = x0 + x4;
    let y1 = x1 + x5;
    let y2 = x2 + x6;
    let y3 = x3 + x7;
    let y4 = x0 - x4;
    let y5 = x1 - x5;
    let y6 = x2 - x6;
    let y7 = x3 - x7;
    let y8 = round_shift(s8 + s12);
    let y9 = round_shift(s9 + s13);
    let y10 = round_shift(s10 + s14);
    let y11 = round_shift(s11 + s15);
    let y12 = round_shift(s8 - s12);
    let y13 = round_shift(s9 - s13);
    let y14 = round_shift(s10 - s14);
    let y15 = round_shift(s11 - s15);

    // stage 3
    let s4 = y4 * COSPI_8_64 + y5 * COSPI_24_64;
    let s5 = y4 * COSPI_24_64 - y5 * COSPI_8_64;
    let s6 = -y6 * COSPI_24_64 + y7 * COSPI_8_64;
    let s7 = y6 * COSPI_8_64 + y7 * COSPI_24_64;
    let s12 = y12 * COSPI_8_64 + y13 * COSPI_24_64;
    let s13 = y12 * COSPI_24_64 - y13 * COSPI_8_64;
    let s14 = -y14 * COSPI_24_64 + y15 * COSPI_8_64;
    let s15 = y14 * COSPI_8_64 + y15 * COSPI_24_64;

    let z0 = y0 + y2;
    let z1 = y1 + y3;
    let z2 = y0 - y2;
    let z3 = y1 - y3;
    let z4 = round_shift(s4 + s6);
    let z5 = round_shift(s5 + s7);
    let z6 = round_shift(s4 - s6);
    let z7 = round_shift(s5 - s7);
    let z8 = y8 + y10;
    let z9 = y9 + y11;
    let z10 = y8 - y10;
    let z11 = y9 - y11;
    let z12 = round_shift(s12 + s14);
    let z13 = round_shift(s13 + s15);
    let z14 = round_shift(s12 - s14);
    let z15 = round_shift(s13 - s15);

    // stage 4
    let w2 = round_shift(-COSPI_16_64 * (z2 + z3));
    let w3 = round_shift(COSPI_16_64 * (z2 - z3));
    let w6 = round_shift(COSPI_16_64 * (z6 + z7));
    let w7 = round_shift(COSPI_16_64 * (-z6 + z7));
    let w10 = round_shift(COSPI_16_64 * (z10 + z11));
    let w11 = round_shift(COSPI_16_64 * (-z10 + z11));
    let w14 = round_shift(-COSPI_16_64 * (z14 + z15));
    let w15 = round_shift(COSPI_16_64 * (z14 - z15));

    output[0] = z0;
    output[1] = -z8;
    output[2] = z12;
    output[3] = -z4;
    output[4] = w6;
    output[5] = w14;
    output[6] = w10;
    output[7] = w2;
    output[8] = w3;
    output[9] = w11;
    output[10] = w15;
    output[11] = w7;
    output[12] = z5;
    output[13] = -z13;
    output[14] = z9;
    output[15] = -z1;
}

fn idct32(input: &[i64], output: &mut [i64]) {
    let mut even_in = [0; 16];
    for (i, v) in even_in.iter_mut().enumerate() {
        *v = input[2 * i];
    }
    let mut even = [0; 16];
    idct16(&even_in, &mut even);

    // stage 1
    let (a16, a31) = rotate(input[1], input[31], COSPI_31_64, COSPI_1_64);
    let (a17, a30) = rotate(input[17], input[15], COSPI_15_64, COSPI_17_64);
    let (a18, a29) = rotate(input[9], input[23], COSPI_23_64, COSPI_9_64);
    let (a19, a28) = rotate(input[25], input[7], COSPI_7_64, COSPI_25_64);
    let (a20, a27) = rotate(input[5], input[27], COSPI_27_64, COSPI_5_64);
    let (a21, a26) = rotate(input[21], input[11], COSPI_11_64, COSPI_21_64);
    let (a22, a25) = rotate(input[13], input[19], COSPI_19_64, COSPI_13_64);
    let (a23, a24) = rotate(input[29], input[3], COSPI_3_64, COSPI_29_64);

    // stage 2
    let b16 = a16 + a17;
    let b17 = a16 - a17;
    let b18 = -a18 + a19;
    let b19 = a18 + a19;
    let b20 = a20 + a21;
    let b21 = a20 - a21;
    let b22 = -a22 + a23;
    let b23 = a22 + a23;
    let b24 = a24 + a25;
    let b25 = a24 - a25;
    let b26 = -a26 + a27;
    let b27 = a26 + a27;
    let b28 = a28 + a29;
    let b29 = a28 - a29;
    let b30 = -a30 + a31;
    let b31 = a30 + a31;

    // stage 3
    let c17 = round_shift(-b17 * COSPI_4_64 + b30 * COSPI_28_64);
    let c30 = round_shift(b17 * COSPI_28_64 + b30 * COSPI_4_64);
    let c18 = round_shift(-b18 * COSPI_28_64 - b29 * COSPI_4_64);
    let c29 = round_shift(-b18 * COSPI_4_64 + b29 * COSPI_28_64);
    let c21 = round_shift(-b21 * COSPI_20_64 + b26 * COSPI_12_64);
    let c26 = round_shift(b21 * COSPI_12_64 + b26 * COSPI_20_64);
    let c22 = round_shift(-b22 * COSPI_12_64 - b25 * COSPI_20_64);
    let c25 = round_shift(-b22 * COSPI_20_64 + b25 * COSPI_12_64);

    // stage 4
    let d16 = b16 + b19;
    let d17 = c17 + c18;
    let d18 = c17 - c18;
    let d19 = b16 - b19;
    let d20 = -b20 + b23;
    let d21 = -c21 + c22;
    let d22 = c21 + c22;
    let d23 = b20 + b23;
    let d24 = b24 + b27;
    let d25 = c25 + c26;
    let d26 = c25 - c26;
    let d27 = b24 - b27;
    let d28 = -b28 + b31;
    let d29 = -c29 + c30;
    let d30 = c29 + c30;
    let d31 = b28 + b31;

    // stage 5
    let e18 = round_shift(-d18 * COSPI_8_64 + d29 * COSPI_24_64);
    let e29 = round_shift(d18 * COSPI_24_64 + d29 * COSPI_8_64);
    let e19 = round_shift(-d19 * COSPI_8_64 + d28 * COSPI_24_64);
    let e28 = round_shift(d19 * COSPI_24_64 + d28 * COSPI_8_64);
    let e20 = round_shift(-d20 * COSPI_24_64 - d27 * COSPI_8_64);
    let e27 = round_shift(-d20 * COSPI_8_64 + d27 * COSPI_24_64);
    let e21 = round_shift(-d21 * COSPI_24_64 - d26 * COSPI_8_64);
    let e26 = round_shift(-d21 * COSPI_8_64 + d26 * COSPI_24_64);

    // stage 6
    let f16 = d16 + d23;
    let f17 = d17 + d22;
    let f18 = e18 + e21;
    let f19 = e19 + e20;
    let f20 = e19 - e20;
    let f21 = e18 - e21;
    let f22 = d17 - d22;
    let f23 = d16 - d23;
    let f24 = -d24 + d31;
    let f25 = -d25 + d30;
    let f26 = -e26 + e29;
    let f27 = -e27 + e28;
    let f28 = e27 + e28;
    let f29 = e26 + e29;
    let f30 = d25 + d30;
    let f31 = d24 + d31;

    // stage 7
    let g20 = round_shift((-f20 + f27) * COSPI_16_64);
    let g27 = round_shift((f20 + f27) * COSPI_16_64);
    let g21 = round_shift((-f21 + f26) * COSPI_16_64);
    let g26 = round_shift((f21 + f26) * COSPI_16_64);
    let g22 = round_shift((-f22 + f25) * COSPI_16_64);
    let g25 = round_shift((f22 + f25) * COSPI_16_64);
    let g23 = round_shift((-f23 + f24) * COSPI_16_64);
    let g24 = round_shift((f23 + f24) * COSPI_16_64);

    let odd = [
        f16, f17, f18, f19, g20, g21, g22, g23, g24, g25, g26, g27, f28, f29, f30, f31,
    ];

    for i in 0..16 {
        output[i] = even[i] + odd[15 - i];
        output[31 - i] = even[i] - odd[15 - i];
    }
}

type Transform1d = fn(&[i64], &mut [i64]);

/// Vertical and horizontal 1D transforms of a 2D transform.
fn transforms(tx_size: TxSize, tx_type: TxType) -> (Transform1d, Transform1d) {
    let (dct, adst): (Transform1d, Transform1d) = match tx_size {
        TxSize::Tx4x4 => (idct4, iadst4),
        TxSize::Tx8x8 => (idct8, iadst8),
        TxSize::Tx16x16 => (idct16, iadst16),
        TxSize::Tx32x32 => (idct32, idct32),
    };

    match tx_type {
        TxType::DctDct => (dct, dct),
        TxType::AdstDct => (adst, dct),
        TxType::DctAdst => (dct, adst),
        TxType::AdstAdst => (adst, adst),
    }
}

fn iwht4x4(input: &[i32], residual: &mut [i32]) {
    let mut tmp = [0i64; 16];

    for i in 0..4 {
        let mut a1 = i64::from(input[4 * i]) >> UNIT_QUANT_SHIFT;
        let mut c1 = i64::from(input[4 * i + 1]) >> UNIT_QUANT_SHIFT;
        let mut d1 = i64::from(input[4 * i + 2]) >> UNIT_QUANT_SHIFT;
        let mut b1 = i64::from(input[4 * i + 3]) >> UNIT_QUANT_SHIFT;
        a1 += c1;
        d1 -= b1;
        let e1 = (a1 - d1) >> 1;
        b1 = e1 - b1;
        c1 = e1 - c1;
        a1 -= b1;
        d1 += c1;
        tmp[4 * i..4 * i + 4].copy_from_slice(&[a1, b1, c1, d1]);
    }

    for i in 0..4 {
        let mut a1 = tmp[i];
        let mut c1 = tmp[4 + i];
        let mut d1 = tmp[8 + i];
        let mut b1 = tmp[12 + i];
        a1 += c1;
        d1 -= b1;
        let e1 = (a1 - d1) >> 1;
        b1 = e1 - b1;
        c1 = e1 - c1;
        a1 -= b1;
        d1 += c1;
        residual[i] = a1 as i32;
        residual[4 + i] = b1 as i32;
        residual[8 + i] = c1 as i32;
        residual[12 + i] = d1 as i32;
    }
}

/// Turns the dequantized coefficients of a `tx_size` block, in raster order, into residuals.
pub fn inverse_transform(
    coefs: &[i32],
    residual: &mut [i32],
    tx_size: TxSize,
    tx_type: TxType,
    lossless: bool,
) {
    if lossless {
        iwht4x4(coefs, residual);
        return;
    }

    let n = tx_size.width();
    let shift = match tx_size {
        TxSize::Tx4x4 => 4,
        TxSize::Tx8x8 => 5,
        _ => 6,
    };
    let (col_tx, row_tx) = transforms(tx_size, tx_type);

    let mut tmp = [0i64; 32 * 32];
    let mut input = [0i64; 32];
    let mut output = [0i64; 32];

    for (row, out) in coefs.chunks(n).zip(tmp.chunks_mut(n)) {
        if row.iter().all(|c| *c == 0) {
            continue;
        }
        for (i, c) in input[..n].iter_mut().zip(row) {
            *i = i64::from(*c);
        }
        row_tx(&input[..n], out);
    }

    for x in 0..n {
        for y in 0..n {
            input[y] = tmp[y * n + x];
        }
        col_tx(&input[..n], &mut output[..n]);
        for y in 0..n {
            let r = output[y];
            residual[y * n + x] = ((r + (1 << (shift - 1))) >> shift) as i32;
        }
    }
}

/// Clears the coefficients a block with end of block `eob` may have written.
pub fn clear_coefs(coefs: &mut [i32], tx_size: TxSize, tx_type: TxType, eob: usize) {
    let len = if eob == 1 {
        1
    } else if tx_type == TxType::DctDct && tx_size <= TxSize::Tx16x16 && eob <= 10 {
        4 * tx_size.width()
    } else if tx_size == TxSize::Tx32x32 && eob <= 34 {
        256
    } else {
        tx_size.num_coeffs()
    };

    coefs[..len].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(coefs: &[i32], tx_size: TxSize, tx_type: TxType) -> Vec<i32> {
        let mut residual = vec![0; tx_size.num_coeffs()];
        inverse_transform(coefs, &mut residual, tx_size, tx_type, false);
        residual
    }

    #[test]
    fn dc_only_blocks_are_flat() {
        for tx_size in [TxSize::Tx4x4, TxSize::Tx8x8, TxSize::Tx16x16, TxSize::Tx32x32] {
            let mut coefs = vec![0; tx_size.num_coeffs()];
            coefs[0] = 1024;
            let residual = run(&coefs, tx_size, TxType::DctDct);
            assert!(residual.iter().all(|r| *r == residual[0]), "{:?}", tx_size);
            assert!(residual[0] > 0);
        }
    }

    #[test]
    fn dc_4x4_value() {
        let mut coefs = [0; 16];
        coefs[0] = 64;
        // 64 * 11585 / 16384 = 45.25 -> 45, then 45 * 11585 / 16384 = 31.8 -> 32, (32 + 8) >> 4.
        assert_eq!(run(&coefs, TxSize::Tx4x4, TxType::DctDct), vec![2; 16]);
    }

    #[test]
    fn zero_input_gives_zero_residual() {
        for tx_type in [TxType::DctDct, TxType::AdstDct, TxType::DctAdst, TxType::AdstAdst] {
            for tx_size in [TxSize::Tx4x4, TxSize::Tx8x8, TxSize::Tx16x16] {
                let coefs = vec![0; tx_size.num_coeffs()];
                assert!(run(&coefs, tx_size, tx_type).iter().all(|r| *r == 0));
            }
        }
    }

    #[test]
    fn adst_direction() {
        // A DC coefficient through a vertical ADST varies down the columns only.
        let mut coefs = [0; 64];
        coefs[0] = 2000;
        let residual = run(&coefs, TxSize::Tx8x8, TxType::AdstDct);

        for y in 0..8 {
            let row = &residual[y * 8..y * 8 + 8];
            assert!(row.iter().all(|r| *r == row[0]));
        }
        assert!(residual[0] < residual[56]);
    }

    #[test]
    fn walsh_hadamard_dc() {
        let mut coefs = [0; 16];
        coefs[0] = 4 * 16;
        let mut residual = [0; 16];
        inverse_transform(&coefs, &mut residual, TxSize::Tx4x4, TxType::DctDct, true);

        // The unit-scaled DC of 16 is halved on each pass and spread over the whole block.
        assert_eq!(residual, [4; 16]);
    }

    #[test]
    fn coefficient_clearing() {
        let mut coefs = vec![7; 1024];
        clear_coefs(&mut coefs, TxSize::Tx32x32, TxType::DctDct, 20);
        assert!(coefs[..256].iter().all(|c| *c == 0));
        assert_eq!(coefs[256], 7);

        let mut coefs = vec![7; 16];
        clear_coefs(&mut coefs, TxSize::Tx4x4, TxType::DctDct, 1);
        assert_eq!(coefs[0], 0);
        assert_eq!(coefs[1], 7);

        let mut coefs = vec![7; 64];
        clear_coefs(&mut coefs, TxSize::Tx8x8, TxType::AdstAdst, 5);
        assert!(coefs.iter().all(|c| *c == 0));
    }
}
