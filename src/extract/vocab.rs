//! Fixed vocabularies the extractors match against.

pub const BRANDS: &[&str] = &[
    "สิงห์", "ช้าง", "ลีโอ", "leo", "heineken", "ไฮเนเก้น", "corona", "โคโรนา",
    "หมีขาว", "carlsberg", "คาร์ลส์เบิร์ก", "tiger", "ไทเกอร์", "asahi", "อาซาฮี",
    "budweiser", "บัดไวเซอร์", "hoegaarden", "เฮอการ์เดน", "stella", "สเตลล่า",
    "guinness", "กินเนส", "peroni", "เปโรนี", "san miguel", "ซานมิเกล",
    "tsingtao", "ชิงเต่า", "kirin", "คิริน", "sapporo", "ซัปโปโร",
    "erdinger", "เออดิงเงอร์", "paulaner", "เปาลาเนอร์", "franziskaner", "ฟรานซิสกาเนอร์",
];

/// Brands reported with a capitalised display name instead of as matched.
pub const CANONICAL_BRANDS: &[(&str, &str)] = &[
    ("leo", "Leo"),
    ("tiger", "Tiger"),
    ("asahi", "Asahi"),
    ("heineken", "Heineken"),
    ("corona", "Corona"),
    ("budweiser", "Budweiser"),
];

pub const PLACES: &[&str] = &[
    "กรุงเทพ", "กทม", "กรุงเทพมหานคร", "bangkok",
    "สมุทรปราการ", "นนทบุรี", "ปทุมธานี", "สมุทรสาคร", "นครปฐม",
    "ชลบุรี", "พัทยา", "ระยอง", "ฉะเชิงเทรา", "สระแก้ว",
    "เชียงใหม่", "เชียงราย", "ลำปาง", "ลำพูน", "แม่ฮ่องสอน",
    "ภูเก็ต", "กระบี่", "พังงา", "สุราษฎร์ธานี", "นครศรีธรรมราช",
    "ขอนแก่น", "อุดรธานี", "อุบลราชธานี", "นครราชสีมา", "โคราช",
    "อยุธยา", "พระนครศรีอยุธยา", "ลพบุรี", "สิงห์บุรี", "อ่างทอง",
    "หาดใหญ่", "สงขลา", "ปัตตานี", "ยะลา", "นราธิวาส",
];

pub const DELIVERY_CUES: &[&str] = &["จัดส่ง", "ส่งได้", "พร้อมส่ง", "delivery"];
pub const PICKUP_CUES: &[&str] = &["นัดรับ", "รับเอง", "pickup"];

pub const DELIVERY: &str = "จัดส่ง";
pub const PICKUP: &str = "นัดรับ";

pub const KEYWORD_GROUPS: &[(&str, &[&str])] = &[
    ("beer", &["เบียร์", "beer", "ขายเบียร์"]),
    (
        "brands",
        &[
            "สิงห์", "ช้าง", "ลีโอ", "leo", "heineken", "ไฮเนเก้น", "corona", "โคโรนา",
            "หมีขาว", "carlsberg", "tiger", "asahi", "budweiser", "hoegaarden", "stella",
            "guinness", "peroni", "san miguel",
        ],
    ),
    (
        "distributor",
        &["ตัวแทนจำหน่าย", "ร้านขาย", "ร้าน", "ร้านค้า", "ตัวแทน", "บริษัทจำหน่าย"],
    ),
    ("selling", &["ขาย", "จำหน่าย", "มีขาย", "พร้อมส่ง", "สั่งได้"]),
    ("delivery", &["จัดส่ง", "ส่งได้", "พร้อมส่ง", "delivery"]),
    (
        "price",
        &["ราคา", "price", "บาท", "฿", "ถูก", "ลดราคา", "โปรโมชั่น", "promotion"],
    ),
    ("contact", &["line", "ไลน์", "โทร", "tel", "สนใจ", "inbox", "dm"]),
];

/// Default second-stage filter: a record must mention at least one of these.
pub const CATEGORY_KEYWORDS: &[&str] = &[
    "เบียร์", "beer", "ขายเบียร์", "สิงห์", "ช้าง", "ลีโอ", "heineken", "สุรา",
    "ตัวแทนจำหน่าย", "ร้านขาย", "ร้าน", "ร้านค้า", "ตัวแทน", "จัดส่ง", "delivery",
];
